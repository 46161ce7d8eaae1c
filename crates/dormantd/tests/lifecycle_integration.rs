//! End-to-end lifecycle tests.
//!
//! Wires the control plane the way `dormantd control` does, serves it on a
//! loopback port, and drives it with the launcher, a watchdog talking HTTP,
//! and the autoscaler.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use dormant_api::ApiState;
use dormant_autoscale::{Autoscaler, ScaleDecision};
use dormant_core::{DormantConfig, Topology, epoch_secs};
use dormant_iam::{Policy, Principal};
use dormant_launcher::{Launcher, LauncherState};
use dormant_provider::{
    DnsZone, GuardedScheduler, HttpProvider, LocalProvider, ProviderError, RetryPolicy,
    ServiceScheduler,
};
use dormant_state::{StateStore, WorldRecord};
use dormant_watchdog::{ActivitySource, Phase, ProbeError, StaticAddress, Watchdog, WatchdogSettings};

const CONFIG: &str = r#"
[launcher]
default_world = "sat"

[[principals]]
name = "watchdog:sat"
token = "wd-sat"

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

struct ControlPlane {
    store: StateStore,
    policy: Arc<Policy>,
    router: Router,
}

fn control_plane() -> ControlPlane {
    let config = DormantConfig::parse(CONFIG).unwrap();
    let store = StateStore::open_in_memory().unwrap();
    let plans = Topology::plan_all(&config.worlds).unwrap();
    for (world, plan) in config.worlds.iter().zip(&plans) {
        store
            .provision_world(&WorldRecord::from_plan(world, plan, epoch_secs()))
            .unwrap();
    }

    let policy = Arc::new(Policy::for_worlds(&config.worlds, &Principal::launcher()).unwrap());
    let tokens = config
        .principals
        .iter()
        .map(|p| (p.token.clone(), Principal::new(p.name.clone())));
    let api = ApiState::new(store.clone(), policy.clone()).with_tokens(tokens);

    let scheduler = GuardedScheduler::new(
        LocalProvider::new(store.clone(), Principal::launcher()),
        policy.clone(),
        Principal::launcher(),
    );
    let launcher = LauncherState {
        launcher: Arc::new(
            Launcher::new(Arc::new(scheduler), config.launcher.default_world.clone())
                .with_retry(RetryPolicy::none()),
        ),
        verifier: None,
    };

    let router = dormant_api::build_router(api).merge(dormant_launcher::build_router(launcher));
    ControlPlane {
        store,
        policy,
        router,
    }
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn sidecar_provider(addr: SocketAddr) -> Arc<HttpProvider> {
    Arc::new(HttpProvider::new(&format!("http://{addr}"), Some("wd-sat".to_string())).unwrap())
}

struct NobodyPlaying;

#[async_trait]
impl ActivitySource for NobodyPlaying {
    async fn is_active(&self) -> Result<bool, ProbeError> {
        Ok(false)
    }
}

#[tokio::test]
async fn launch_publish_and_idle_shutdown() {
    let plane = control_plane();
    let addr = serve(plane.router.clone()).await;

    // A player hits the launcher.
    let req = Request::builder().method("POST").uri("/launch").body(Body::empty()).unwrap();
    let resp = plane.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value =
        serde_json::from_slice(&resp.into_body().collect().await.unwrap().to_bytes()).unwrap();
    assert_eq!(body["status"], "started");
    assert_eq!(plane.store.get_world("sat").unwrap().unwrap().desired_count, 1);

    // The instance starts; nobody joins within the grace period.
    let provider = sidecar_provider(addr);
    let mut settings = WatchdogSettings::new("sat", "Zsat", "sat.example.com");
    settings.startup_grace = Duration::ZERO;
    let ip: IpAddr = "3.3.3.3".parse().unwrap();
    let mut watchdog = Watchdog::new(
        settings,
        provider.clone(),
        provider,
        Box::new(NobodyPlaying),
        Box::new(StaticAddress(Some(ip))),
        epoch_secs(),
    )
    .with_retry(RetryPolicy::none());

    let report = watchdog.cycle(epoch_secs()).await;
    assert!(report.dns_updated);
    assert!(report.shutdown_requested);
    assert_eq!(report.phase, Phase::ShuttingDown);

    let record = plane.store.get_dns_record("Zsat", "sat.example.com").unwrap().unwrap();
    assert_eq!(record.address, "3.3.3.3");
    let world = plane.store.get_world("sat").unwrap().unwrap();
    assert_eq!(world.desired_count, 0);

    // Nothing else happens once shutdown was accepted.
    let report = watchdog.cycle(epoch_secs() + 60).await;
    assert!(!report.shutdown_requested);
    assert_eq!(plane.store.get_world("sat").unwrap().unwrap().revision, world.revision);

    // A second launch brings it back.
    let req = Request::builder().method("POST").uri("/launch/sat").body(Body::empty()).unwrap();
    let resp = plane.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(plane.store.get_world("sat").unwrap().unwrap().desired_count, 1);
}

#[tokio::test]
async fn sidecar_token_is_confined_to_its_world() {
    let plane = control_plane();
    plane.store.set_desired_count("val", 1, "test", epoch_secs()).unwrap();
    let addr = serve(plane.router).await;
    let provider = sidecar_provider(addr);

    let err = provider.set_desired_count("val", 0).await.unwrap_err();
    assert!(matches!(err, ProviderError::AccessDenied(_)));
    let err = provider
        .upsert_record("Zval", "val.example.com", "6.6.6.6", 30)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::AccessDenied(_)));

    assert_eq!(plane.store.get_world("val").unwrap().unwrap().desired_count, 1);
    let record = plane.store.get_dns_record("Zval", "val.example.com").unwrap().unwrap();
    assert_eq!(record.address, "0.0.0.0");

    // Its own world is fine.
    let world = provider.describe("sat").await.unwrap();
    assert_eq!(world.dns.zone_id, "Zsat");
}

#[tokio::test]
async fn reported_idle_metrics_drive_scale_down() {
    let plane = control_plane();
    let now = epoch_secs();
    plane.store.set_desired_count("sat", 1, "launcher", now - 3600).unwrap();
    let addr = serve(plane.router.clone()).await;
    let provider = sidecar_provider(addr);

    // One low sample in each of the last four five-minute periods.
    for i in 0..4u64 {
        let epoch = now - (4 - i) * 300 + 150;
        provider.put_sample("sat", 2.0, epoch).await.unwrap();
    }

    let scheduler = GuardedScheduler::new(
        LocalProvider::new(plane.store.clone(), Principal::autoscaler()),
        plane.policy.clone(),
        Principal::autoscaler(),
    );
    let mut autoscaler = Autoscaler::new(Arc::new(scheduler)).with_retry(RetryPolicy::none());
    let decisions = autoscaler.evaluate_all(now).await.unwrap();

    let sat = decisions.iter().find(|(id, _)| id == "sat").unwrap();
    assert_eq!(sat.1, ScaleDecision::ScaleTo(0));
    let val = decisions.iter().find(|(id, _)| id == "val").unwrap();
    assert_eq!(val.1, ScaleDecision::NoChange);
    assert_eq!(plane.store.get_world("sat").unwrap().unwrap().desired_count, 0);

    // Cooldown holds even though the metric is still low.
    plane.store.set_desired_count("sat", 1, "launcher", now + 60).unwrap();
    let decisions = autoscaler.evaluate_all(now + 120).await.unwrap();
    let sat = decisions.iter().find(|(id, _)| id == "sat").unwrap();
    assert!(matches!(sat.1, ScaleDecision::Cooldown { .. }));
}
