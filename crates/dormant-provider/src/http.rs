//! HTTP client for the provider API.
//!
//! Used by sidecars that run next to the game process rather than next to
//! the store. Each call opens a fresh HTTP/1 connection; calls are rare
//! (once per watchdog cycle) so there is nothing to pool.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::debug;

use dormant_state::{
    DesiredCountChange, DnsChange, DnsRecordEntry, MetricSample, ScaleEvent, WorldRecord,
};

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{DnsZone, ServiceScheduler};
use crate::wire::{ApiResponse, DesiredCountRequest, MetricRequest, RecordRequest};

const USER_AGENT: &str = "dormant-provider/0.1";

#[derive(Debug, Clone)]
pub struct HttpProvider {
    authority: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpProvider {
    /// Client for a provider at `base_url` (e.g. `http://10.0.0.5:8480`).
    pub fn new(base_url: &str, token: Option<String>) -> ProviderResult<Self> {
        let uri: http::Uri = base_url
            .parse()
            .map_err(|e| ProviderError::Invalid(format!("provider url {base_url}: {e}")))?;
        if uri.scheme_str().is_some_and(|s| s != "http") {
            return Err(ProviderError::Invalid(format!(
                "provider url {base_url}: only plain http is supported"
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| ProviderError::Invalid(format!("provider url {base_url}: missing host")))?
            .to_string();
        Ok(Self {
            authority,
            token,
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        self.request(Method::GET, path, None::<&()>).await
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ProviderResult<T> {
        self.request(method, path, Some(body)).await
    }

    async fn request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ProviderResult<T> {
        let payload = match body {
            Some(b) => Bytes::from(
                serde_json::to_vec(b).map_err(|e| ProviderError::Invalid(e.to_string()))?,
            ),
            None => Bytes::new(),
        };
        let uri = format!("http://{}{}", self.authority, path);

        let (status, raw) = tokio::time::timeout(self.timeout, self.exchange(method.clone(), &uri, payload))
            .await
            .map_err(|_| ProviderError::Transient(format!("{method} {uri} timed out")))??;

        debug!(%method, %uri, %status, "provider call");
        decode(status, &raw)
    }

    async fn exchange(
        &self,
        method: Method,
        uri: &str,
        payload: Bytes,
    ) -> ProviderResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| ProviderError::Transient(format!("connect {}: {e}", self.authority)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProviderError::Transient(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("host", &self.authority)
            .header("user-agent", USER_AGENT)
            .header("content-type", "application/json");
        if let Some(token) = &self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = builder
            .body(Full::new(payload))
            .map_err(|e| ProviderError::Invalid(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProviderError::Transient(format!("request: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProviderError::Transient(format!("read body: {e}")))?
            .to_bytes();
        Ok((status, body))
    }
}

/// Unwrap the response envelope, mapping error statuses onto the taxonomy.
fn decode<T: DeserializeOwned>(status: StatusCode, raw: &[u8]) -> ProviderResult<T> {
    let envelope: Option<ApiResponse<T>> = serde_json::from_slice(raw).ok();

    if status.is_success() {
        return envelope
            .and_then(|e| e.data)
            .ok_or_else(|| ProviderError::Invalid("response missing data".to_string()));
    }

    let message = envelope
        .and_then(|e| e.error)
        .unwrap_or_else(|| String::from_utf8_lossy(raw).into_owned());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AccessDenied(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::CONFLICT => ProviderError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::Invalid(message),
        other => ProviderError::Http {
            status: other.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl ServiceScheduler for HttpProvider {
    async fn list_worlds(&self) -> ProviderResult<Vec<WorldRecord>> {
        self.get("/api/v1/worlds").await
    }

    async fn describe(&self, world_id: &str) -> ProviderResult<WorldRecord> {
        self.get(&format!("/api/v1/worlds/{world_id}")).await
    }

    async fn set_desired_count(
        &self,
        world_id: &str,
        count: u32,
    ) -> ProviderResult<DesiredCountChange> {
        let body = DesiredCountRequest {
            count,
            expected_revision: None,
        };
        self.send(Method::PUT, &format!("/api/v1/worlds/{world_id}/desired-count"), &body)
            .await
    }

    async fn compare_and_set_desired_count(
        &self,
        world_id: &str,
        expected_revision: u64,
        count: u32,
    ) -> ProviderResult<DesiredCountChange> {
        let body = DesiredCountRequest {
            count,
            expected_revision: Some(expected_revision),
        };
        self.send(Method::PUT, &format!("/api/v1/worlds/{world_id}/desired-count"), &body)
            .await
    }

    async fn put_sample(&self, world_id: &str, utilization: f64, epoch: u64) -> ProviderResult<()> {
        let body = MetricRequest {
            utilization,
            epoch: Some(epoch),
        };
        let _: IgnoredAny = self
            .send(Method::POST, &format!("/api/v1/worlds/{world_id}/metrics"), &body)
            .await?;
        Ok(())
    }

    async fn recent_samples(&self, world_id: &str, since: u64) -> ProviderResult<Vec<MetricSample>> {
        self.get(&format!("/api/v1/worlds/{world_id}/metrics?since={since}"))
            .await
    }

    async fn scale_events(&self, world_id: &str, limit: usize) -> ProviderResult<Vec<ScaleEvent>> {
        self.get(&format!("/api/v1/worlds/{world_id}/events?limit={limit}"))
            .await
    }
}

#[async_trait]
impl DnsZone for HttpProvider {
    async fn get_record(&self, zone_id: &str, name: &str) -> ProviderResult<Option<DnsRecordEntry>> {
        match self
            .get(&format!("/api/v1/zones/{zone_id}/records/{name}"))
            .await
        {
            Ok(record) => Ok(Some(record)),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        address: &str,
        ttl: u32,
    ) -> ProviderResult<DnsChange> {
        let body = RecordRequest {
            address: address.to_string(),
            ttl: Some(ttl),
        };
        self.send(Method::PUT, &format!("/api/v1/zones/{zone_id}/records/{name}"), &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base_url() {
        let provider = HttpProvider::new("http://10.0.0.5:8480", None).unwrap();
        assert_eq!(provider.authority, "10.0.0.5:8480");

        assert!(HttpProvider::new("https://provider.example.com", None).is_err());
        assert!(HttpProvider::new("/relative", None).is_err());
    }

    #[test]
    fn decode_success_envelope() {
        let raw = br#"{"success":true,"data":{"world_id":"w","previous":0,"current":1,"revision":1,"changed":true}}"#;
        let change: DesiredCountChange = decode(StatusCode::OK, raw).unwrap();
        assert!(change.changed);
    }

    #[test]
    fn decode_maps_error_statuses() {
        let raw = br#"{"success":false,"error":"access denied"}"#;
        let err = decode::<IgnoredAny>(StatusCode::FORBIDDEN, raw).unwrap_err();
        assert!(matches!(err, ProviderError::AccessDenied(ref m) if m == "access denied"));

        let err = decode::<IgnoredAny>(StatusCode::CONFLICT, raw).unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));

        let err = decode::<IgnoredAny>(StatusCode::SERVICE_UNAVAILABLE, b"down").unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = HttpProvider::new(&format!("http://{addr}"), None).unwrap();
        let err = provider.describe("w").await.unwrap_err();
        assert!(err.is_transient());
    }
}
