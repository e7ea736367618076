use std::path::PathBuf;
use uuid::Uuid;

pub type RunId = Uuid;

/// One URL and where its body should land.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub save_path: PathBuf,
}

/// `Name` / `ShowName` stamped on every event of a run.
#[derive(Debug, Clone)]
pub struct RunLabel {
    pub name: String,
    pub show_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TransferHints {
    pub thread_count: usize,
    pub chunk_size: u64,
}

impl TransferHints {
    pub fn new(thread_count: usize, chunk_size_mb: u64) -> Self {
        Self {
            thread_count: thread_count.max(1),
            chunk_size: chunk_size_mb.max(1).saturating_mul(1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: u64,
    pub len: u64,
}

impl Fragment {
    pub fn end_inclusive(&self) -> u64 {
        self.offset + self.len.saturating_sub(1)
    }
}
