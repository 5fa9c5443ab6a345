pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

/// Per-user config location, relative to the home directory.
pub const USER_CONFIG: &str = ".config/livebook/config.yml";
pub const SYSTEM_CONFIG: &str = "/etc/livebook/config.yml";

pub use parse::{load_config, load_config_from_str, ConfigError};
pub use types::{Config, SourceConfig, ThrottleConfig};

/// Expands `$env{VAR_NAME}` references in a string.
/// Unset variables are left as written.
pub fn expand_env_vars(text: &str) -> String {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(text, |caps: &regex::Captures| {
        // Unset variables keep their original text
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Replaces a leading `~` with the home directory, when one is known.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(home_dir) = dirs::home_dir() else {
        return path.to_path_buf();
    };

    match path.strip_prefix("~") {
        Ok(rest) if rest.as_os_str().is_empty() => home_dir,
        Ok(rest) => home_dir.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Picks the config file: the explicit path if given, otherwise the first of
/// `~/.config/livebook/config.yml` and `/etc/livebook/config.yml` that exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(USER_CONFIG);
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
