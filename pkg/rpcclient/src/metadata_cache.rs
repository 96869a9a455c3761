//! Metadata cache contract the executor depends on, plus a reference
//! in-memory implementation built over a `TopologyResolver`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_std::sync::Mutex;
use async_trait::async_trait;

use crate::ids::{ApplyIndex, CopysetGroupId, FsId, InodeId, MetaServerId, PartitionId};
use crate::naming::next_component_id;
use crate::target::Target;

/// What the executor needs from a metadata location cache. Implementations
/// are free to back this with any discovery mechanism as long as readers
/// never observe a half-updated entry.
#[async_trait]
pub trait MetadataCache: Send + Sync {
    /// Resolves the target and last-known apply index for a specific
    /// inode. `None` on lookup failure.
    async fn get_target(&self, fs_id: FsId, inode_id: InodeId) -> Option<(Target, ApplyIndex)>;

    /// Picks any viable target within `fs_id`, for operations (like inode
    /// creation) that don't yet have an inode identity to look up.
    async fn select_target(&self, fs_id: FsId) -> Option<(Target, ApplyIndex)>;

    /// Re-resolves the leader for `target`'s copyset, mutating
    /// `metaserver_id`/`endpoint` in place on success.
    async fn get_target_leader(&self, target: &mut Target, apply_index: &mut ApplyIndex) -> bool;

    /// Whether recent timeouts suggest the leader for this copyset may
    /// have changed since it was last resolved.
    async fn is_leader_may_change(&self, group: CopysetGroupId) -> bool;

    /// Sets the leader-may-change hint for a copyset, e.g. after observing
    /// a transport timeout against it.
    async fn set_leader_may_change(&self, group: CopysetGroupId, value: bool);

    /// Marks a partition unavailable after it reports an allocation
    /// failure, so future `select_target` calls route elsewhere.
    async fn mark_partition_unavailable(&self, partition_id: PartitionId);
}

/// Backs an `InMemoryMetadataCache`'s cache misses. Stands in for the
/// out-of-scope MDS/discovery layer.
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    async fn locate(&self, fs_id: FsId, inode_id: InodeId) -> Option<(Target, ApplyIndex)>;

    async fn select_partition(&self, fs_id: FsId) -> Option<(Target, ApplyIndex)>;

    async fn resolve_leader(
        &self,
        target: &Target,
    ) -> Option<(MetaServerId, crate::ids::Endpoint)>;
}

struct State {
    by_inode: HashMap<(FsId, InodeId), (Target, ApplyIndex)>,
    leader_may_change: HashMap<CopysetGroupId, bool>,
    unavailable_partitions: HashSet<PartitionId>,
}

/// Reference `MetadataCache` built over a `TopologyResolver`. Everything is
/// kept behind a single mutex: per-entry locking would let a reader observe
/// a Target with a fresh leader but a stale apply index, which is exactly
/// the kind of half-updated entry the cache contract forbids.
pub struct InMemoryMetadataCache {
    name: String,
    resolver: Arc<dyn TopologyResolver>,
    state: Mutex<State>,
}

impl InMemoryMetadataCache {
    pub fn new(resolver: Arc<dyn TopologyResolver>) -> Self {
        Self::with_name(format!("metadata_cache#{}", next_component_id()), resolver)
    }

    /// Same as `new`, but with an explicit log-line prefix instead of the
    /// default process-local counter.
    pub fn with_name(name: impl Into<String>, resolver: Arc<dyn TopologyResolver>) -> Self {
        Self {
            name: name.into(),
            resolver,
            state: Mutex::new(State {
                by_inode: HashMap::new(),
                leader_may_change: HashMap::new(),
                unavailable_partitions: HashSet::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl MetadataCache for InMemoryMetadataCache {
    async fn get_target(&self, fs_id: FsId, inode_id: InodeId) -> Option<(Target, ApplyIndex)> {
        {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.by_inode.get(&(fs_id, inode_id)) {
                if !state.unavailable_partitions.contains(&entry.0.partition_id) {
                    return Some(entry.clone());
                }
                // Cached entry points at a partition that was since marked
                // unavailable; evict it and fall through to a fresh lookup.
                state.by_inode.remove(&(fs_id, inode_id));
            }
        }

        let (target, apply_index) = self.resolver.locate(fs_id, inode_id).await?;
        let mut state = self.state.lock().await;
        state
            .by_inode
            .insert((fs_id, inode_id), (target.clone(), apply_index));
        Some((target, apply_index))
    }

    async fn select_target(&self, fs_id: FsId) -> Option<(Target, ApplyIndex)> {
        let (target, apply_index) = self.resolver.select_partition(fs_id).await?;
        let state = self.state.lock().await;
        if state.unavailable_partitions.contains(&target.partition_id) {
            return None;
        }
        Some((target, apply_index))
    }

    async fn get_target_leader(&self, target: &mut Target, _apply_index: &mut ApplyIndex) -> bool {
        let resolved = self.resolver.resolve_leader(target).await;

        match resolved {
            Some((meta_server_id, endpoint)) => {
                target.metaserver_id = meta_server_id;
                target.endpoint = endpoint;
                // A confirmed refresh resolves the uncertainty the hint
                // exists to flag; an unreachable resolver leaves it set so
                // the next timeout still takes the fast path.
                let mut state = self.state.lock().await;
                state.leader_may_change.insert(target.group_id(), false);
                true
            }
            None => false,
        }
    }

    async fn is_leader_may_change(&self, group: CopysetGroupId) -> bool {
        let state = self.state.lock().await;
        *state.leader_may_change.get(&group).unwrap_or(&false)
    }

    async fn set_leader_may_change(&self, group: CopysetGroupId, value: bool) {
        let mut state = self.state.lock().await;
        state.leader_may_change.insert(group, value);
    }

    async fn mark_partition_unavailable(&self, partition_id: PartitionId) {
        let mut state = self.state.lock().await;
        state.unavailable_partitions.insert(partition_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Endpoint;

    struct FixedResolver {
        target: Target,
        apply_index: ApplyIndex,
        leader: Option<(MetaServerId, Endpoint)>,
    }

    #[async_trait]
    impl TopologyResolver for FixedResolver {
        async fn locate(&self, _fs_id: FsId, _inode_id: InodeId) -> Option<(Target, ApplyIndex)> {
            Some((self.target.clone(), self.apply_index))
        }

        async fn select_partition(&self, _fs_id: FsId) -> Option<(Target, ApplyIndex)> {
            Some((self.target.clone(), self.apply_index))
        }

        async fn resolve_leader(&self, _target: &Target) -> Option<(MetaServerId, Endpoint)> {
            self.leader.clone()
        }
    }

    fn sample_target() -> Target {
        Target {
            pool_id: 1,
            copyset_id: 2,
            partition_id: 3,
            metaserver_id: 4,
            endpoint: Endpoint::new("10.0.0.1", 6800),
            tx_id: 1,
        }
    }

    #[async_std::test]
    async fn get_target_caches_after_first_lookup() {
        let resolver = Arc::new(FixedResolver {
            target: sample_target(),
            apply_index: 10,
            leader: None,
        });
        let cache = InMemoryMetadataCache::new(resolver);

        let (target, apply_index) = cache.get_target(1, 100).await.unwrap();
        assert_eq!(target, sample_target());
        assert_eq!(apply_index, 10);
    }

    #[async_std::test]
    async fn failed_refresh_leaves_leader_may_change_set() {
        let resolver = Arc::new(FixedResolver {
            target: sample_target(),
            apply_index: 10,
            leader: None,
        });
        let cache = InMemoryMetadataCache::new(resolver);
        let group = sample_target().group_id();
        cache.set_leader_may_change(group, true).await;

        let mut target = sample_target();
        let mut apply_index = 10;
        let ok = cache.get_target_leader(&mut target, &mut apply_index).await;

        assert!(!ok);
        assert!(cache.is_leader_may_change(group).await);
    }

    #[async_std::test]
    async fn successful_refresh_clears_leader_may_change() {
        let resolver = Arc::new(FixedResolver {
            target: sample_target(),
            apply_index: 10,
            leader: Some((9, Endpoint::new("10.0.0.9", 6809))),
        });
        let cache = InMemoryMetadataCache::new(resolver);
        let group = sample_target().group_id();
        cache.set_leader_may_change(group, true).await;

        let mut target = sample_target();
        let mut apply_index = 10;
        let ok = cache.get_target_leader(&mut target, &mut apply_index).await;

        assert!(ok);
        assert!(!cache.is_leader_may_change(group).await);
    }

    #[async_std::test]
    async fn mark_partition_unavailable_blocks_select_target() {
        let resolver = Arc::new(FixedResolver {
            target: sample_target(),
            apply_index: 10,
            leader: None,
        });
        let cache = InMemoryMetadataCache::new(resolver);

        cache.mark_partition_unavailable(3).await;
        assert!(cache.select_target(1).await.is_none());
    }
}
