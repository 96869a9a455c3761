//! Client-side RPC dispatch and routing core for a sharded metadata
//! service: a retry-capable task executor, a metadata location cache, and
//! a channel manager, wired together around a shared target/cache/channel
//! contract the way a metaserver client wires its own equivalents.

pub mod channel;
pub mod config;
pub mod executor;
pub mod ids;
pub mod jitter;
pub mod metadata_cache;
pub mod naming;
pub mod status;
pub mod target;
pub mod task_context;
pub mod variants;

pub use channel::{ChannelFactory, ChannelManager, MetaChannel};
pub use config::ExecutorOptions;
pub use executor::{DefaultTargetResolver, TargetResolver, TaskExecutor};
pub use ids::{
    ApplyIndex, CopysetGroupId, CopysetId, Endpoint, FsId, InodeId, MetaServerId, PartitionId,
    PoolId, TxId,
};
pub use jitter::{FixedJitterSource, JitterSource, RandJitterSource};
pub use metadata_cache::{InMemoryMetadataCache, MetadataCache, TopologyResolver};
pub use status::{MetaStatusCode, RpcStatus, TransportError};
pub use target::Target;
pub use task_context::{Controller, RpcTask, TaskContext};
pub use variants::CreateInodeTargetResolver;
