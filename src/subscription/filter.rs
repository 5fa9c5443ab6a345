use crate::entry::LogEntry;
use serde::{Deserialize, Serialize};

/// Restricts the logbook to specific entities and/or devices.
///
/// `None` means "not filtered on this axis"; `Some(vec![])` means "filtered to
/// nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub entity_ids: Option<Vec<String>>,
    #[serde(default)]
    pub device_ids: Option<Vec<String>>,
}

impl Filter {
    pub fn entities<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_ids: Some(ids.into_iter().map(Into::into).collect()),
            device_ids: None,
        }
    }

    /// True when some list is specified and every specified list is empty.
    ///
    /// Such a filter can never match anything, so the engine skips the
    /// subscription entirely.
    pub fn is_vacuous(&self) -> bool {
        let specified = self.entity_ids.is_some() || self.device_ids.is_some();
        let all_empty = self.entity_ids.as_ref().map_or(true, Vec::is_empty)
            && self.device_ids.as_ref().map_or(true, Vec::is_empty);
        specified && all_empty
    }

    /// An entry matches when no list is specified, or when its entity or
    /// device appears in the corresponding specified list.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if self.entity_ids.is_none() && self.device_ids.is_none() {
            return true;
        }

        let entity_hit = match (&self.entity_ids, entry.entity_id()) {
            (Some(ids), Some(id)) => ids.iter().any(|candidate| candidate == id),
            _ => false,
        };
        let device_hit = match (&self.device_ids, entry.device_id()) {
            (Some(ids), Some(id)) => ids.iter().any(|candidate| candidate == id),
            _ => false,
        };

        entity_hit || device_hit
    }

    /// Whether switching from `previous` to `self` needs a new subscription.
    pub fn differs_from(&self, previous: &Filter) -> bool {
        ids_changed(previous.entity_ids.as_deref(), self.entity_ids.as_deref())
            || ids_changed(previous.device_ids.as_deref(), self.device_ids.as_deref())
    }
}

/// Compare two optional id lists by symmetric membership.
///
/// Order is irrelevant. Going from unspecified to specified (or back) always
/// counts as a change, since a narrower filter reduces backend load.
pub fn ids_changed(old: Option<&[String]>, new: Option<&[String]>) -> bool {
    match (old, new) {
        (None, None) => false,
        (Some(old), Some(new)) => {
            old.len() != new.len()
                || old.iter().any(|id| !new.contains(id))
                || new.iter().any(|id| !old.contains(id))
        }
        _ => true,
    }
}
