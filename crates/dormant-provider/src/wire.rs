//! JSON bodies exchanged with the provider HTTP API.

use serde::{Deserialize, Serialize};

/// Response envelope shared by every provider route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// PUT /api/v1/worlds/{id}/desired-count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredCountRequest {
    pub count: u32,
    /// Apply only if the world is still at this revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

/// POST /api/v1/worlds/{id}/metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRequest {
    pub utilization: f64,
    /// Sample time; the server clock when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
}

/// PUT /api/v1/zones/{zone}/records/{name}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRequest {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

/// Query string for metric and event listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub since: Option<u64>,
    pub limit: Option<usize>,
}
