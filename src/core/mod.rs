pub mod engine;
pub mod error;
pub mod listing;
pub mod walker;

pub use engine::{DownloadReport, SyncConfig, SyncEngine};
pub use error::{ErrorKind, OperationFailure, OperationOutcome, SyncError};
pub use listing::{parse_listing, Entry, EntryKind};
pub use walker::{DirectoryWalker, ListedEntry, WalkOutcome};
