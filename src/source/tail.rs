use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

/// Incremental reader for an append-only text file.
///
/// Each [`FileTail::poll`] returns the complete lines written since the last
/// poll. A trailing line without its newline is held back until it is
/// finished. Truncation or replacement of the file restarts from offset 0.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    offset: u64,
    inode: Option<u64>,
    /// Raw bytes of the unfinished last line. Decoding waits for the newline
    /// so a multibyte character split across reads stays intact.
    partial: Vec<u8>,
}

impl FileTail {
    /// Start at a known byte offset, typically the end of content already
    /// consumed by a full read.
    pub async fn starting_at(path: impl Into<PathBuf>, offset: u64) -> std::io::Result<Self> {
        let path = path.into();
        let inode = match tokio::fs::metadata(&path).await {
            Ok(metadata) => Some(get_inode(&metadata)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            offset,
            inode,
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read whatever was appended since the last call.
    pub async fn poll(&mut self) -> std::io::Result<Vec<String>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let inode = get_inode(&metadata);
        if self.inode.is_some_and(|known| known != inode) {
            info!(path = %self.path.display(), "File replaced; reading from start");
            self.restart();
        } else if metadata.len() < self.offset {
            info!(path = %self.path.display(), "File truncated; reading from start");
            self.restart();
        }
        self.inode = Some(inode);

        if metadata.len() == self.offset {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.offset)).await?;
        let read = file.read_to_end(&mut self.partial).await?;
        self.offset += read as u64;

        Ok(self.take_complete_lines())
    }

    fn restart(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        let lines: Vec<String> = String::from_utf8_lossy(&complete)
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();

        debug!(path = %self.path.display(), lines = lines.len(), "Read appended lines");
        lines
    }
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(_metadata: &Metadata) -> u64 {
    0
}
