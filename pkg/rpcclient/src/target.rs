//! The routing tuple bound into a task context before an attempt is made.

use crate::ids::{CopysetGroupId, CopysetId, Endpoint, MetaServerId, PartitionId, PoolId, TxId};

/// An immutable target identifying exactly which server to talk to for a
/// given copyset/partition, and the transaction epoch the server should
/// fence the request against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub pool_id: PoolId,
    pub copyset_id: CopysetId,
    pub partition_id: PartitionId,
    pub metaserver_id: MetaServerId,
    pub endpoint: Endpoint,
    pub tx_id: TxId,
}

impl Target {
    /// A target is usable once every id is non-zero and its endpoint
    /// resolves to a concrete host/port.
    pub fn is_valid(&self) -> bool {
        self.pool_id != 0
            && self.copyset_id != 0
            && self.partition_id != 0
            && self.metaserver_id != 0
            && self.endpoint.is_resolvable()
    }

    pub fn group_id(&self) -> CopysetGroupId {
        CopysetGroupId::new(self.pool_id, self.copyset_id)
    }
}
