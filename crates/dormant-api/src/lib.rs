//! dormant-api: the provider HTTP API.
//!
//! Exposes the scheduler and DNS operations of the embedded store to actors
//! running elsewhere (the watchdog sidecar talks to this through
//! `dormant_provider::HttpProvider`). Every request carries a bearer token
//! that maps to a principal; every operation is checked against the grant
//! policy before it touches the store.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/worlds` | List worlds the caller may describe |
//! | GET | `/api/v1/worlds/{id}` | Describe a world |
//! | PUT | `/api/v1/worlds/{id}/desired-count` | Set desired count (optionally compare-and-set) |
//! | POST | `/api/v1/worlds/{id}/metrics` | Report a utilization sample |
//! | GET | `/api/v1/worlds/{id}/metrics` | Samples since `?since=` |
//! | GET | `/api/v1/worlds/{id}/events` | Scale event log, newest first |
//! | GET | `/api/v1/zones/{zone}/records/{name}` | Read a DNS record |
//! | PUT | `/api/v1/zones/{zone}/records/{name}` | Upsert a DNS record |

pub mod auth;
pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, put};

use dormant_iam::{Policy, Principal};
use dormant_provider::{GuardedDns, GuardedScheduler, LocalProvider};
use dormant_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub policy: Arc<Policy>,
    tokens: Arc<HashMap<String, Principal>>,
    retention: Option<Duration>,
}

impl ApiState {
    pub fn new(store: StateStore, policy: Arc<Policy>) -> Self {
        Self {
            store,
            policy,
            tokens: Arc::new(HashMap::new()),
            retention: None,
        }
    }

    pub fn with_tokens(mut self, tokens: impl IntoIterator<Item = (String, Principal)>) -> Self {
        self.tokens = Arc::new(tokens.into_iter().collect());
        self
    }

    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = retention;
        self
    }

    pub fn principal_for_token(&self, token: &str) -> Option<&Principal> {
        self.tokens.get(token)
    }

    fn provider(&self, principal: &Principal) -> LocalProvider {
        let provider = LocalProvider::new(self.store.clone(), principal.clone());
        match self.retention {
            Some(retention) => provider.with_retention(retention),
            None => provider,
        }
    }

    /// Scheduler view for one caller.
    pub fn scheduler(&self, principal: &Principal) -> GuardedScheduler<LocalProvider> {
        GuardedScheduler::new(self.provider(principal), self.policy.clone(), principal.clone())
    }

    /// DNS view for one caller.
    pub fn dns(&self, principal: &Principal) -> GuardedDns<LocalProvider> {
        GuardedDns::new(self.provider(principal), self.policy.clone(), principal.clone())
    }
}

/// Build the provider API router, nested under `/api/v1`.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/worlds", get(handlers::list_worlds))
        .route("/worlds/{id}", get(handlers::describe_world))
        .route("/worlds/{id}/desired-count", put(handlers::set_desired_count))
        .route(
            "/worlds/{id}/metrics",
            get(handlers::list_samples).post(handlers::put_sample),
        )
        .route("/worlds/{id}/events", get(handlers::list_events))
        .route(
            "/zones/{zone}/records/{name}",
            get(handlers::get_record).put(handlers::upsert_record),
        )
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use dormant_core::{DormantConfig, Topology};
    use dormant_state::WorldRecord;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
[[principals]]
name = "watchdog:sat"
token = "wd-sat"

[[principals]]
name = "autoscaler"
token = "scaler"

[[world]]
id = "sat"
ports = [{ port = 7777, protocol = "udp" }]
[world.volume]
uid = 1000
gid = 1000
[world.dns]
zone_id = "Zsat"
record_name = "sat.example.com"

[[world]]
id = "val"
ports = [{ port = 2456, protocol = "udp" }]
[world.volume]
uid = 1000
gid = 1000
[world.dns]
zone_id = "Zval"
record_name = "val.example.com"
"#;

    fn app() -> (StateStore, Router) {
        let config = DormantConfig::parse(CONFIG).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let plans = Topology::plan_all(&config.worlds).unwrap();
        for (world, plan) in config.worlds.iter().zip(&plans) {
            store.provision_world(&WorldRecord::from_plan(world, plan, 1_000)).unwrap();
        }
        let policy = Policy::for_worlds(&config.worlds, &Principal::launcher()).unwrap();
        let tokens = config
            .principals
            .iter()
            .map(|p| (p.token.clone(), Principal::new(p.name.clone())));
        let state = ApiState::new(store.clone(), Arc::new(policy)).with_tokens(tokens);
        (store, build_router(state))
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn requires_known_token() {
        let (_, app) = app();
        let resp = app.clone().oneshot(request("GET", "/api/v1/worlds", None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(request("GET", "/api/v1/worlds", Some("guess"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["success"], false);
    }

    #[tokio::test]
    async fn list_is_filtered_by_grants() {
        let (_, app) = app();
        let resp = app
            .clone()
            .oneshot(request("GET", "/api/v1/worlds", Some("wd-sat"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|w| w["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["sat"]);

        let resp = app
            .oneshot(request("GET", "/api/v1/worlds", Some("scaler"), None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn watchdog_scales_only_its_world() {
        let (store, app) = app();
        store.set_desired_count("sat", 1, "test", 1_000).unwrap();
        store.set_desired_count("val", 1, "test", 1_000).unwrap();

        let resp = app
            .clone()
            .oneshot(request("PUT", "/api/v1/worlds/sat/desired-count", Some("wd-sat"), Some(json!({"count": 0}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["data"]["current"], 0);
        assert_eq!(body["data"]["changed"], true);

        let resp = app
            .oneshot(request("PUT", "/api/v1/worlds/val/desired-count", Some("wd-sat"), Some(json!({"count": 0}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.get_world("val").unwrap().unwrap().desired_count, 1);
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let (store, app) = app();
        store.set_desired_count("sat", 1, "test", 1_000).unwrap();

        let resp = app
            .oneshot(request(
                "PUT",
                "/api/v1/worlds/sat/desired-count",
                Some("scaler"),
                Some(json!({"count": 0, "expected_revision": 0})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(store.get_world("sat").unwrap().unwrap().desired_count, 1);
    }

    #[tokio::test]
    async fn out_of_range_count_is_bad_request() {
        let (_, app) = app();
        let resp = app
            .oneshot(request("PUT", "/api/v1/worlds/sat/desired-count", Some("scaler"), Some(json!({"count": 2}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_flow_from_watchdog_to_autoscaler() {
        let (_, app) = app();
        let now = dormant_core::epoch_secs();

        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/worlds/sat/metrics",
                Some("wd-sat"),
                Some(json!({"utilization": 4.5, "epoch": now})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        // The autoscaler may read but not write metrics.
        let resp = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/worlds/sat/metrics",
                Some("scaler"),
                Some(json!({"utilization": 1.0})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let uri = format!("/api/v1/worlds/sat/metrics?since={}", now - 60);
        let resp = app.oneshot(request("GET", &uri, Some("scaler"), None)).await.unwrap();
        let body = json_body(resp).await;
        let samples = body["data"].as_array().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0]["utilization"], 4.5);
    }

    #[tokio::test]
    async fn dns_records_are_record_scoped() {
        let (_, app) = app();

        let resp = app
            .clone()
            .oneshot(request("GET", "/api/v1/zones/Zsat/records/sat.example.com", Some("wd-sat"), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["data"]["address"], "0.0.0.0");

        let resp = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/v1/zones/Zsat/records/sat.example.com",
                Some("wd-sat"),
                Some(json!({"address": "3.3.3.3"})),
            ))
            .await
            .unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["data"]["changed"], true);
        assert_eq!(body["data"]["record"]["ttl"], 30);

        let resp = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/v1/zones/Zval/records/val.example.com",
                Some("wd-sat"),
                Some(json!({"address": "3.3.3.3"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .oneshot(request(
                "PUT",
                "/api/v1/zones/Zsat/records/other.example.com",
                Some("wd-sat"),
                Some(json!({"address": "3.3.3.3"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
