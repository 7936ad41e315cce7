//! Local persistence: the SQLite store, pipeline checkpoints and flat-file
//! backups.

pub mod backup;
pub mod checkpoint;
pub mod local_storage;

pub use backup::{BackupManager, BackupReport, StoreMetadata};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointProgress, CheckpointStatus};
pub use local_storage::{
    DataVersion, LocalStorage, LocalStorageConfig, LocalStorageStats, SyncMetadata, SyncStatus,
    SYNC_RUN, SYNC_STOCK_LIST,
};
