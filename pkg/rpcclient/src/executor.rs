//! The retry/backoff loop that drives a `TaskContext` to a terminal status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::ChannelManager;
use crate::config::ExecutorOptions;
use crate::ids::ApplyIndex;
use crate::jitter::JitterSource;
use crate::metadata_cache::MetadataCache;
use crate::status::{MetaStatusCode, RpcStatus};
use crate::target::Target;
use crate::task_context::{Controller, TaskContext};

/// Resolves the target bound into a task context when it doesn't already
/// have a valid one. The default resolver looks a target up by inode
/// identity; `CreateInodeTargetResolver` (see `variants`) instead selects
/// any viable partition.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(
        &self,
        cache: &dyn MetadataCache,
        ctx: &TaskContext,
    ) -> Option<(Target, ApplyIndex)>;
}

/// Looks a target up by `(fs_id, inode_id)`, as most metadata operations do.
#[derive(Debug, Default)]
pub struct DefaultTargetResolver;

#[async_trait]
impl TargetResolver for DefaultTargetResolver {
    async fn resolve(
        &self,
        cache: &dyn MetadataCache,
        ctx: &TaskContext,
    ) -> Option<(Target, ApplyIndex)> {
        let inode_id = ctx.inode_id?;
        cache.get_target(ctx.fs_id, inode_id).await
    }
}

/// Drives one `TaskContext` through repeated attempts until success, a
/// non-retryable status, or retry exhaustion.
pub struct TaskExecutor {
    options: ExecutorOptions,
    cache: Arc<dyn MetadataCache>,
    channel_manager: Arc<ChannelManager>,
    jitter: Arc<dyn JitterSource>,
    resolver: Arc<dyn TargetResolver>,
}

impl TaskExecutor {
    pub fn new(
        options: ExecutorOptions,
        cache: Arc<dyn MetadataCache>,
        channel_manager: Arc<ChannelManager>,
        jitter: Arc<dyn JitterSource>,
    ) -> Self {
        Self::with_resolver(
            options,
            cache,
            channel_manager,
            jitter,
            Arc::new(DefaultTargetResolver),
        )
    }

    pub fn with_resolver(
        options: ExecutorOptions,
        cache: Arc<dyn MetadataCache>,
        channel_manager: Arc<ChannelManager>,
        jitter: Arc<dyn JitterSource>,
        resolver: Arc<dyn TargetResolver>,
    ) -> Self {
        Self {
            options,
            cache,
            channel_manager,
            jitter,
            resolver,
        }
    }

    /// Runs `ctx` to a terminal status, per the attempt loop in this
    /// crate's design notes: at most `max_retry + 1` invocations of the
    /// send-callable, backing off between retryable attempts.
    pub async fn do_rpc_task(&self, ctx: &mut TaskContext) -> RpcStatus {
        ctx.rpc_timeout_ms = self.options.rpc_timeout_ms;

        let mut last_status = RpcStatus::Transport(crate::status::TransportError::Other);

        loop {
            // Mirrors `task_->retryTimes++ > opt_.maxRetry`: the check uses
            // the count of attempts made so far, then increments for the
            // attempt about to be made. Net effect is exactly `max_retry +
            // 1` total attempts before this aborts.
            if ctx.retry_times > self.options.max_retry {
                return last_status;
            }
            ctx.retry_times += 1;

            if !ctx.target.is_valid() {
                match self.resolver.resolve(&*self.cache, ctx).await {
                    Some((target, apply_index)) => {
                        ctx.target = target;
                        ctx.apply_index = apply_index;
                    }
                    None => {
                        self.sleep_us(self.options.retry_interval_us).await;
                        continue;
                    }
                }
            }

            let channel = match self
                .channel_manager
                .get_or_create_channel(ctx.target.metaserver_id, &ctx.target.endpoint)
                .await
            {
                Ok(Some(channel)) => channel,
                _ => {
                    self.sleep_us(self.options.retry_interval_us).await;
                    continue;
                }
            };

            let controller = Controller {
                timeout_ms: ctx.rpc_timeout_ms,
            };
            let status = ctx
                .task
                .send(&ctx.target, ctx.apply_index, channel, &controller)
                .await;
            last_status = status;

            if !status.is_retryable() {
                return status;
            }

            self.apply_cache_effects(ctx, status).await;
            self.pre_process_before_retry(ctx, status).await;
        }
    }

    /// Cache side effects of a retryable status: channel health checks,
    /// leader refreshes, and partition invalidation. Mirrors `OnReturn`'s
    /// per-status branches in the original executor.
    async fn apply_cache_effects(&self, ctx: &mut TaskContext, status: RpcStatus) {
        match status {
            RpcStatus::Transport(_) => {
                self.channel_manager
                    .reset_channel_if_not_healthy(ctx.target.metaserver_id)
                    .await;
                self.refresh_leader(ctx).await;
            }
            RpcStatus::App(MetaStatusCode::Redirected)
            | RpcStatus::App(MetaStatusCode::CopysetNotExist) => {
                self.refresh_leader(ctx).await;
            }
            RpcStatus::App(MetaStatusCode::PartitionAllocIdFail) => {
                self.cache
                    .mark_partition_unavailable(ctx.target.partition_id)
                    .await;
                // Force re-resolution on the next pass instead of
                // hammering the now-unavailable partition again.
                ctx.target = Target::default();
            }
            _ => {}
        }
    }

    /// Re-resolves the leader for the task's current copyset. Sets
    /// `retry_directly` when the leader actually changed, so the next
    /// attempt skips the base interval sleep.
    async fn refresh_leader(&self, ctx: &mut TaskContext) {
        let old_metaserver_id = ctx.target.metaserver_id;
        let ok = self
            .cache
            .get_target_leader(&mut ctx.target, &mut ctx.apply_index)
            .await;

        println!(
            "refresh leader for {{inode_id: {:?}, pool: {}, copyset: {}}} {}",
            ctx.inode_id,
            ctx.target.pool_id,
            ctx.target.copyset_id,
            if ok { "success" } else { "failure" }
        );

        ctx.retry_directly = old_metaserver_id != ctx.target.metaserver_id;
    }

    /// The non-cache part of retry preparation: suspend bookkeeping and
    /// backoff. Mirrors `PreProcessBeforeRetry`.
    async fn pre_process_before_retry(&self, ctx: &mut TaskContext, status: RpcStatus) {
        if ctx.retry_times >= self.options.max_retry_times_before_consider_suspend {
            if !ctx.suspend {
                ctx.suspend = true;
                eprintln!(
                    "task retried {} times, set suspend flag",
                    self.options.max_retry_times_before_consider_suspend
                );
            } else if ctx.retry_times % self.options.max_retry_times_before_consider_suspend == 0 {
                eprintln!("task retried {} times", ctx.retry_times);
            }
        }

        if status.is_transport_timeout() {
            let group = ctx.target.group_id();
            let leader_may_change = self.cache.is_leader_may_change(group).await;

            ctx.rpc_timeout_ms =
                if ctx.retry_times < self.options.min_retry_times_force_timeout_backoff
                    && leader_may_change
                {
                    self.options.rpc_timeout_ms
                } else {
                    self.timeout_backoff(ctx.retry_times)
                };

            eprintln!("rpc timeout, next timeout = {}", ctx.rpc_timeout_ms);

            // A timeout is itself evidence the leader may have moved;
            // future attempts re-check this until a refresh clears it.
            self.cache.set_leader_may_change(group, true).await;
            return;
        }

        if status == RpcStatus::App(MetaStatusCode::Overload) {
            let sleep_us = self.overload_backoff(ctx.retry_times).await;
            eprintln!("metaserver overload, sleep(us) = {}", sleep_us);
            self.sleep_us(sleep_us).await;
            return;
        }

        if !ctx.retry_directly {
            self.sleep_us(self.options.retry_interval_us).await;
        }
    }

    fn timeout_backoff(&self, retry_times: u32) -> u64 {
        let pow = retry_times.min(self.options.max_timeout_pow());
        let next = self
            .options
            .rpc_timeout_ms
            .saturating_mul(1u64 << pow.min(63));
        next.min(self.options.max_rpc_timeout_ms)
            .max(self.options.rpc_timeout_ms)
    }

    async fn overload_backoff(&self, retry_times: u32) -> u64 {
        let pow = retry_times.min(self.options.max_overload_pow());
        let base = self
            .options
            .retry_interval_us
            .saturating_mul(1u64 << pow.min(63));

        // +/- 10% jitter, matching the original's `rand() % (sleep/5 + 1) -
        // sleep/10` but drawn from an injectable unit-interval source
        // instead of the global C RNG.
        let jitter_span = (base as f64) * 0.2;
        let jitter = (self.jitter.next_unit() * jitter_span) - jitter_span / 2.0;
        let jittered = (base as f64 + jitter).max(0.0) as u64;

        jittered
            .min(self.options.max_retry_sleep_interval_us)
            .max(self.options.retry_interval_us)
    }

    async fn sleep_us(&self, us: u64) {
        async_std::task::sleep(Duration::from_micros(us)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::channel::{ChannelFactory, MetaChannel};
    use crate::ids::{Endpoint, FsId, InodeId};
    use crate::metadata_cache::{InMemoryMetadataCache, TopologyResolver};
    use crate::status::TransportError;
    use crate::task_context::RpcTask;

    struct DummyChannel;

    #[async_trait]
    impl MetaChannel for DummyChannel {
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    struct DummyFactory;

    #[async_trait]
    impl ChannelFactory for DummyFactory {
        async fn connect(
            &self,
            _meta_server_id: crate::ids::MetaServerId,
            _endpoint: &Endpoint,
        ) -> common::errors::Result<Arc<dyn MetaChannel>> {
            Ok(Arc::new(DummyChannel))
        }
    }

    fn target_for(metaserver_id: u32, partition_id: u32) -> Target {
        Target {
            pool_id: 1,
            copyset_id: 9,
            partition_id,
            metaserver_id,
            endpoint: Endpoint::new("10.0.0.1", 6800 + metaserver_id as u16),
            tx_id: 1,
        }
    }

    struct StaticResolver {
        target: StdMutex<Target>,
        leader: StdMutex<Option<(crate::ids::MetaServerId, Endpoint)>>,
    }

    #[async_trait]
    impl TopologyResolver for StaticResolver {
        async fn locate(&self, _fs_id: FsId, _inode_id: InodeId) -> Option<(Target, ApplyIndex)> {
            Some((self.target.lock().unwrap().clone(), 1))
        }

        async fn select_partition(&self, _fs_id: FsId) -> Option<(Target, ApplyIndex)> {
            Some((self.target.lock().unwrap().clone(), 1))
        }

        async fn resolve_leader(
            &self,
            _target: &Target,
        ) -> Option<(crate::ids::MetaServerId, Endpoint)> {
            self.leader.lock().unwrap().clone()
        }
    }

    /// Replays a fixed sequence of statuses, one per call, repeating the
    /// last entry once exhausted.
    struct ScriptedTask {
        statuses: Vec<RpcStatus>,
        calls: AtomicUsize,
    }

    impl ScriptedTask {
        fn new(statuses: Vec<RpcStatus>) -> Self {
            Self {
                statuses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RpcTask for ScriptedTask {
        async fn send(
            &self,
            _target: &Target,
            _apply_index: ApplyIndex,
            _channel: Arc<dyn MetaChannel>,
            _controller: &Controller,
        ) -> RpcStatus {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .statuses
                .get(i)
                .unwrap_or_else(|| self.statuses.last().unwrap())
        }
    }

    fn test_executor(
        resolver: Arc<StaticResolver>,
        jitter: f64,
    ) -> (TaskExecutor, Arc<InMemoryMetadataCache>) {
        let cache = Arc::new(InMemoryMetadataCache::new(resolver));
        let channels = Arc::new(ChannelManager::new(Arc::new(DummyFactory)));
        let executor = TaskExecutor::new(
            ExecutorOptions {
                rpc_timeout_ms: 500,
                max_rpc_timeout_ms: 8_000,
                retry_interval_us: 1_000,
                max_retry_sleep_interval_us: 8_000,
                max_retry: 20,
                max_retry_times_before_consider_suspend: 5,
                min_retry_times_force_timeout_backoff: 3,
            },
            cache.clone(),
            channels,
            Arc::new(crate::jitter::FixedJitterSource(jitter)),
        );
        (executor, cache)
    }

    #[async_std::test]
    async fn happy_path_returns_ok_on_first_attempt() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        let (executor, _cache) = test_executor(resolver, 0.5);
        let task = Arc::new(ScriptedTask::new(vec![RpcStatus::Ok]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let status = executor.do_rpc_task(&mut ctx).await;

        assert_eq!(status, RpcStatus::Ok);
        assert_eq!(task.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.retry_times, 1);
    }

    #[async_std::test]
    async fn redirect_then_ok_sets_retry_directly_and_skips_sleep() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(Some((9, Endpoint::new("10.0.0.9", 6809)))),
        });
        let (executor, _cache) = test_executor(resolver, 0.5);
        let task = Arc::new(ScriptedTask::new(vec![
            RpcStatus::App(MetaStatusCode::Redirected),
            RpcStatus::Ok,
        ]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let status = executor.do_rpc_task(&mut ctx).await;

        assert_eq!(status, RpcStatus::Ok);
        assert_eq!(task.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.target.metaserver_id, 9);
    }

    #[async_std::test]
    async fn retry_exhaustion_stops_at_max_retry_plus_one_attempts() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        let (executor, _cache) = test_executor(resolver, 0.5);
        let task = Arc::new(ScriptedTask::new(vec![RpcStatus::App(
            MetaStatusCode::Overload,
        )]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let status = executor.do_rpc_task(&mut ctx).await;

        assert_eq!(status, RpcStatus::App(MetaStatusCode::Overload));
        // max_retry = 20 -> exactly 21 attempts.
        assert_eq!(task.calls.load(Ordering::SeqCst), 21);
        assert_eq!(ctx.retry_times, 21);
    }

    #[async_std::test]
    async fn not_found_app_status_is_terminal_after_single_attempt() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        let (executor, cache) = test_executor(resolver, 0.5);
        let group = target_for(4, 3).group_id();
        let task = Arc::new(ScriptedTask::new(vec![RpcStatus::App(
            MetaStatusCode::NotFound,
        )]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let status = executor.do_rpc_task(&mut ctx).await;

        assert_eq!(status, RpcStatus::App(MetaStatusCode::NotFound));
        assert_eq!(task.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.retry_times, 1);
        // A non-retryable app status has no cache side effects: the
        // target is untouched and the leader-may-change hint stays clear.
        assert_eq!(ctx.target.metaserver_id, 4);
        assert!(!cache.is_leader_may_change(group).await);
        assert!(cache.select_target(1).await.is_some());
    }

    #[async_std::test]
    async fn copyset_not_exist_triggers_leader_refresh() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(Some((7, Endpoint::new("10.0.0.7", 6807)))),
        });
        let (executor, _cache) = test_executor(resolver, 0.5);
        let task = Arc::new(ScriptedTask::new(vec![
            RpcStatus::App(MetaStatusCode::CopysetNotExist),
            RpcStatus::Ok,
        ]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let status = executor.do_rpc_task(&mut ctx).await;

        assert_eq!(status, RpcStatus::Ok);
        assert_eq!(task.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.target.metaserver_id, 7);
        assert!(ctx.retry_directly);
    }

    #[async_std::test]
    async fn partition_alloc_fail_marks_unavailable_and_forces_reresolution() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        let (executor, cache) = test_executor(resolver.clone(), 0.5);
        let task = Arc::new(ScriptedTask::new(vec![
            RpcStatus::App(MetaStatusCode::PartitionAllocIdFail),
            RpcStatus::Ok,
        ]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let status = executor.do_rpc_task(&mut ctx).await;

        assert_eq!(status, RpcStatus::Ok);
        assert_eq!(task.calls.load(Ordering::SeqCst), 2);
        assert!(cache.select_target(1).await.is_none());
    }

    #[async_std::test]
    async fn suspend_flag_is_sticky() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        let (executor, _cache) = test_executor(resolver, 0.5);
        let task = Arc::new(ScriptedTask::new(vec![RpcStatus::App(
            MetaStatusCode::Overload,
        )]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let _ = executor.do_rpc_task(&mut ctx).await;

        assert!(ctx.suspend);
    }

    #[async_std::test]
    async fn leader_change_fast_path_resets_to_base_timeout() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        let (executor, cache) = test_executor(resolver, 0.5);
        let group = target_for(4, 3).group_id();
        cache.set_leader_may_change(group, true).await;

        let task = Arc::new(ScriptedTask::new(vec![
            RpcStatus::Transport(TransportError::TimedOut),
            RpcStatus::Ok,
        ]));
        let mut ctx = TaskContext::new(1, 100, 500, task.clone());

        let _ = executor.do_rpc_task(&mut ctx).await;

        // retry_times was 1 (< min_retry_times_force_timeout_backoff=3)
        // and leader_may_change was true, so the fast path kept the base
        // timeout instead of doubling it.
        assert_eq!(ctx.rpc_timeout_ms, 500);
    }

    #[async_std::test]
    async fn overload_backoff_stays_in_bounds_across_jitter_extremes() {
        let resolver = Arc::new(StaticResolver {
            target: StdMutex::new(target_for(4, 3)),
            leader: StdMutex::new(None),
        });
        for jitter in [0.0, 1.0] {
            let (executor, _cache) = test_executor(resolver.clone(), jitter);
            let task = Arc::new(ScriptedTask::new(vec![
                RpcStatus::App(MetaStatusCode::Overload),
                RpcStatus::Ok,
            ]));
            let mut ctx = TaskContext::new(1, 100, 500, task.clone());
            let status = executor.do_rpc_task(&mut ctx).await;
            assert_eq!(status, RpcStatus::Ok);
        }
    }
}
