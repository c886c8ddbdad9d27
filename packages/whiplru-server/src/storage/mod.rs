//! The local storage core (C1-C6): recency index, time-sliced partitions
//! over the KV adapter, negative cache, write-forward log, and the upstream
//! collaborator, orchestrated by [`manager::StorageManager`].

pub mod engine;
pub mod flags;
pub mod index;
pub mod manager;
pub mod negative_cache;
pub mod partition;
pub mod redb_engine;
pub mod upstream;
pub mod write_forward;

pub use engine::{KvEngine, KvError};
pub use flags::{default_flag_reader, AssetFlags, PurgeFilter, PurgeFlagReader};
pub use index::{IndexEntry, PartitionId, RecencyIndex};
pub use manager::StorageManager;
pub use negative_cache::NegativeCache;
pub use partition::{Partition, PartitionManager};
pub use redb_engine::RedbEngine;
pub use upstream::{NullUpstream, UpstreamAssetService, UpstreamError};
pub use write_forward::{WriteForwardError, WriteForwardLog};
