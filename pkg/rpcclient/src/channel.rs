//! Channel manager: one shared channel per meta server, created lazily and
//! recycled on request once the substrate reports it unhealthy.

use std::collections::HashMap;
use std::sync::Arc;

use async_std::sync::Mutex;
use async_trait::async_trait;
use common::errors::*;

use crate::ids::{Endpoint, MetaServerId};
use crate::naming::next_component_id;

/// A single RPC channel to a meta server. The real transport connection is
/// out of scope for this crate; only the health signal the executor needs
/// to decide whether to recycle the channel is part of the contract.
#[async_trait]
pub trait MetaChannel: Send + Sync {
    async fn is_healthy(&self) -> bool;
}

/// Establishes channels to meta servers. Stands in for the RPC substrate's
/// own connection-establishment logic, which lives outside this crate.
///
/// Unlike the executor's own status taxonomy (always an integer code, never
/// an out-of-band error), this contract fronts real connection setup and so
/// can fail for reasons that taxonomy doesn't cover (DNS failure, refused
/// connection). Those failures are logged at the point they occur and
/// collapse to a routing miss for the executor, which already knows how to
/// retry one.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn connect(
        &self,
        meta_server_id: MetaServerId,
        endpoint: &Endpoint,
    ) -> Result<Arc<dyn MetaChannel>>;
}

struct Entry {
    channel: Arc<dyn MetaChannel>,
}

/// Caches channels by meta server id behind a single mutex, so concurrent
/// `get_or_create_channel` calls for the same id can't race into duplicate
/// connects.
pub struct ChannelManager {
    name: String,
    factory: Arc<dyn ChannelFactory>,
    channels: Mutex<HashMap<MetaServerId, Entry>>,
}

impl ChannelManager {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        Self::with_name(format!("channel_manager#{}", next_component_id()), factory)
    }

    /// Same as `new`, but with an explicit log-line prefix instead of the
    /// default process-local counter.
    pub fn with_name(name: impl Into<String>, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cached channel for `meta_server_id`, connecting lazily
    /// on first use. `Ok(None)` means connect failed; the caller treats
    /// this the same as a routing miss (sleep and retry).
    pub async fn get_or_create_channel(
        &self,
        meta_server_id: MetaServerId,
        endpoint: &Endpoint,
    ) -> Result<Option<Arc<dyn MetaChannel>>> {
        let mut channels = self.channels.lock().await;
        if let Some(entry) = channels.get(&meta_server_id) {
            return Ok(Some(entry.channel.clone()));
        }

        let channel = match self.factory.connect(meta_server_id, endpoint).await {
            Ok(channel) => channel,
            Err(e) => {
                eprintln!(
                    "{}: connect to meta server {} failed: {}",
                    self.name, meta_server_id, e
                );
                return Ok(None);
            }
        };

        channels.insert(
            meta_server_id,
            Entry {
                channel: channel.clone(),
            },
        );
        Ok(Some(channel))
    }

    /// Discards the cached channel for `meta_server_id` if the substrate
    /// reports it unhealthy, forcing a fresh connect on next use.
    pub async fn reset_channel_if_not_healthy(&self, meta_server_id: MetaServerId) {
        let mut channels = self.channels.lock().await;
        let unhealthy = match channels.get(&meta_server_id) {
            Some(entry) => !entry.channel.is_healthy().await,
            None => false,
        };
        if unhealthy {
            channels.remove(&meta_server_id);
        }
    }
}
