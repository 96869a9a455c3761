//! Target-selection variants for operations that don't have a prior inode
//! identity to route by.

use async_trait::async_trait;

use crate::executor::TargetResolver;
use crate::ids::ApplyIndex;
use crate::metadata_cache::MetadataCache;
use crate::target::Target;
use crate::task_context::TaskContext;

/// Used for inode creation: there's no existing inode to look up, so the
/// target is whichever viable partition within the task's filesystem the
/// cache picks.
#[derive(Debug, Default)]
pub struct CreateInodeTargetResolver;

#[async_trait]
impl TargetResolver for CreateInodeTargetResolver {
    async fn resolve(
        &self,
        cache: &dyn MetadataCache,
        ctx: &TaskContext,
    ) -> Option<(Target, ApplyIndex)> {
        cache.select_target(ctx.fs_id).await
    }
}
