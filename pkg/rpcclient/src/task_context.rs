//! The per-call value the executor drives to completion: routing state,
//! retry bookkeeping, and the send-callable performing the actual RPC.

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::MetaChannel;
use crate::ids::{ApplyIndex, FsId, InodeId};
use crate::status::RpcStatus;
use crate::target::Target;

/// Per-attempt transport configuration. Only the timeout matters to this
/// crate; everything else about the call (serialization, deadlines beyond
/// a single attempt) belongs to the send-callable and the substrate it
/// talks to.
#[derive(Debug, Clone, Copy)]
pub struct Controller {
    pub timeout_ms: u64,
}

/// The send-callable bound into a task context. Invoked once per attempt;
/// must not retry internally — the executor owns retry policy.
#[async_trait]
pub trait RpcTask: Send + Sync {
    async fn send(
        &self,
        target: &Target,
        apply_index: ApplyIndex,
        channel: Arc<dyn MetaChannel>,
        controller: &Controller,
    ) -> RpcStatus;
}

/// Describes a single logical RPC attempt sequence. Mutable for the
/// duration of one `do_rpc_task` call; discarded on return.
pub struct TaskContext {
    pub fs_id: FsId,
    /// Unset for operations (like inode creation) whose target is
    /// selected rather than looked up by inode identity.
    pub inode_id: Option<InodeId>,

    pub target: Target,
    pub apply_index: ApplyIndex,

    pub rpc_timeout_ms: u64,
    pub retry_times: u32,

    /// Set once retries cross the configured threshold; sticky for the
    /// remainder of the task.
    pub suspend: bool,
    /// Set by a leader refresh that changed the leader; tells the next
    /// attempt to skip the inter-attempt sleep. Can go stale: only a
    /// refresh writes it, so a retryable status that doesn't refresh
    /// (overload, partition-alloc-fail) leaves whatever value a previous
    /// refresh left behind.
    pub retry_directly: bool,

    pub task: Arc<dyn RpcTask>,
}

impl TaskContext {
    pub fn new(fs_id: FsId, inode_id: InodeId, rpc_timeout_ms: u64, task: Arc<dyn RpcTask>) -> Self {
        Self {
            fs_id,
            inode_id: Some(inode_id),
            target: Target::default(),
            apply_index: 0,
            rpc_timeout_ms,
            retry_times: 0,
            suspend: false,
            retry_directly: false,
            task,
        }
    }

    /// For operations without a target inode identity (e.g. inode
    /// creation), where the target is selected rather than looked up.
    pub fn new_without_inode(fs_id: FsId, rpc_timeout_ms: u64, task: Arc<dyn RpcTask>) -> Self {
        Self {
            fs_id,
            inode_id: None,
            target: Target::default(),
            apply_index: 0,
            rpc_timeout_ms,
            retry_times: 0,
            suspend: false,
            retry_directly: false,
            task,
        }
    }
}
