pub mod collection;
pub mod config;
pub mod error;
pub mod http;
pub mod lister;
pub mod models;
pub mod progress;
pub mod record;
pub mod schema;
pub mod sync;
pub mod transform;
pub mod writer;

#[cfg(test)]
mod testing;

pub use error::{Result, SyncError, unpack_error};
pub use sync::{SyncEngine, SyncOutcome, SyncSettings, SyncState, SyncStats};
