//! Storage module for SysRow
//!
//! - `json`: one JSON file per record, written atomically
//! - `layout`: the data directory tree shared by every subsystem

mod json;
mod layout;

pub use json::JsonStore;
pub use layout::DataLayout;

/// A record that could not be loaded during a bulk listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Record key (file stem)
    pub key: String,

    /// Why it was skipped
    pub reason: String,
}

/// Result of a bulk listing: the records that loaded plus the ones skipped
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub skipped: Vec<SkippedRecord>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> Listing<T> {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Listing<U> {
        Listing {
            items: self.items.into_iter().map(f).collect(),
            skipped: self.skipped,
        }
    }
}
