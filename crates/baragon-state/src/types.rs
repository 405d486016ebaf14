//! Persisted record types.

use serde::{Deserialize, Serialize};

use baragon_core::{AggregateStatus, BaragonRequest, BaragonService, UpstreamInfo};

/// A service as last applied (on an agent) or last converged (on the
/// coordinator), with its full upstream set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub service: BaragonService,
    pub upstreams: Vec<UpstreamInfo>,
    /// Request that produced this record.
    pub request_id: String,
    /// Unix millis of the last update.
    pub updated_at: u64,
}

impl ServiceRecord {
    pub fn table_key(&self) -> &str {
        &self.service.service_id
    }
}

/// A submitted request together with its current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request: BaragonRequest,
    /// Groups the request was rolled out to.
    pub groups: Vec<String>,
    pub status: AggregateStatus,
}

impl RequestRecord {
    pub fn table_key(&self) -> &str {
        self.request.request_id()
    }
}
