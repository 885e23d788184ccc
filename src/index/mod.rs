//! In-memory index: snapshots, the refresher that publishes them, and the
//! writer that mutates the store behind them

mod refresher;
mod snapshot;
mod writer;

pub use refresher::{spawn_refresher, RefreshState, RefresherHandle, RefresherStatus};
pub use snapshot::{IndexEntry, IndexSnapshot};
pub use writer::{spawn_backfill, IndexWriter, UpsertError, UpsertOutcome};
