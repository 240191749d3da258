//! Record persistence and change notification
//!
//! One JSON record per origin. Writers always replace the whole record, so
//! callers that mutate part of it go through [`crate::queue::MutationQueue`].

pub mod changes;
pub mod file;
pub mod memory;
pub mod traits;

pub use changes::{ChangeFeed, RecordChange};
pub use file::JsonFileStore;
pub use memory::MemoryRecordStore;
pub use traits::RecordStore;
