//! # Shards
//!
//! State is partitioned by address range across shards. This module holds
//! the pieces that describe and talk to them:
//!
//! - [`descriptor`] / [`range_table`]: which shard owns which addresses.
//! - [`store`]: the [`ShardStore`] contract every shard implements.
//! - [`local`] (sled) and [`memory`]: in-process stores.
//! - [`wire`], [`remote`] and [`server`]: the TCP protocol for shards that
//!   live in another process.

pub mod descriptor;
pub mod local;
pub mod memory;
pub mod range_table;
pub mod remote;
pub mod server;
pub mod store;
pub mod wire;

pub use descriptor::{DownloadSource, ShardDescriptor, ShardEndpoint, ShardId, ShardRange};
pub use local::LocalShardStore;
pub use memory::MemoryShardStore;
pub use range_table::{Keyspace, RangeError, RangeTable};
pub use remote::RemoteShardStore;
pub use server::ShardServer;
pub use store::{bulk_export, CommitId, ExportPage, ShardError, ShardStore};
