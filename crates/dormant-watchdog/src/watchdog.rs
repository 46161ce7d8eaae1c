//! The watchdog cycle and loop.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use dormant_core::epoch_secs;
use dormant_provider::{DnsZone, ProviderError, RetryPolicy, ServiceScheduler, retry_transient};

use crate::cpu::CpuSampler;
use crate::idle::{IdleEvent, IdleTracker, Phase};
use crate::notify::{Notice, Notifier};
use crate::probe::{ActivitySource, AddressSource};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(10 * 60);

/// Deploy-time parameters, immutable for the sidecar's lifetime.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub world_id: String,
    pub zone_id: String,
    /// DNS name players connect to.
    pub record_name: String,
    pub ttl: u32,
    pub check_interval: Duration,
    pub idle_timeout: Duration,
    pub startup_grace: Duration,
}

impl WatchdogSettings {
    pub fn new(world_id: &str, zone_id: &str, record_name: &str) -> Self {
        Self {
            world_id: world_id.to_string(),
            zone_id: zone_id.to_string(),
            record_name: record_name.to_string(),
            ttl: 30,
            check_interval: DEFAULT_CHECK_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            startup_grace: DEFAULT_STARTUP_GRACE,
        }
    }
}

/// What one cycle observed and did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// `None` when the activity probe failed.
    pub activity: Option<bool>,
    pub address: Option<IpAddr>,
    /// A DNS write changed the record this cycle.
    pub dns_updated: bool,
    pub utilization: Option<f64>,
    pub event: IdleEvent,
    pub shutdown_requested: bool,
    pub phase: Phase,
}

pub struct Watchdog {
    settings: WatchdogSettings,
    scheduler: Arc<dyn ServiceScheduler>,
    dns: Arc<dyn DnsZone>,
    activity: Box<dyn ActivitySource>,
    address: Box<dyn AddressSource>,
    cpu: Option<CpuSampler>,
    notifier: Notifier,
    retry: RetryPolicy,
    tracker: IdleTracker,
    /// Last address known to be in DNS. Loaded from the zone on first use.
    published: Option<String>,
    published_loaded: bool,
    announced: bool,
}

impl Watchdog {
    pub fn new(
        settings: WatchdogSettings,
        scheduler: Arc<dyn ServiceScheduler>,
        dns: Arc<dyn DnsZone>,
        activity: Box<dyn ActivitySource>,
        address: Box<dyn AddressSource>,
        started_at: u64,
    ) -> Self {
        let tracker = IdleTracker::new(settings.idle_timeout, settings.startup_grace, started_at);
        Self {
            settings,
            scheduler,
            dns,
            activity,
            address,
            cpu: None,
            notifier: Notifier::disabled(),
            retry: RetryPolicy::default(),
            tracker,
            published: None,
            published_loaded: false,
            announced: false,
        }
    }

    pub fn with_cpu(mut self, cpu: CpuSampler) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn phase(&self) -> Phase {
        self.tracker.phase()
    }

    /// Run one observation cycle at time `now`.
    pub async fn cycle(&mut self, now: u64) -> CycleReport {
        if self.tracker.is_shutting_down() && !self.relaunched(now).await {
            return CycleReport {
                activity: None,
                address: None,
                dns_updated: false,
                utilization: None,
                event: IdleEvent::None,
                shutdown_requested: false,
                phase: Phase::ShuttingDown,
            };
        }

        let activity = match self.activity.is_active().await {
            Ok(active) => Some(active),
            Err(e) => {
                warn!(error = %e, "activity probe failed, treating as unknown");
                None
            }
        };

        let address = match self.address.public_address().await {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "address lookup failed");
                None
            }
        };
        let dns_updated = match address {
            Some(ip) => self.publish_address(ip).await,
            None => false,
        };

        let utilization = self.report_utilization(now).await;

        let event = self.tracker.observe(activity, now);
        let shutdown_requested = match event {
            IdleEvent::IdleTimeout { idle_secs } => self.request_shutdown(idle_secs).await,
            IdleEvent::PlayersJoined => {
                info!(world = %self.settings.world_id, "players connected");
                false
            }
            IdleEvent::PlayersLeft => {
                info!(world = %self.settings.world_id, "all players left, idle clock started");
                false
            }
            IdleEvent::None => false,
        };

        CycleReport {
            activity,
            address,
            dns_updated,
            utilization,
            event,
            shutdown_requested,
            phase: self.tracker.phase(),
        }
    }

    /// After a shutdown was accepted, check whether the world was scaled
    /// back up before this instance stopped. Reads only.
    async fn relaunched(&mut self, now: u64) -> bool {
        match self.scheduler.describe(&self.settings.world_id).await {
            Ok(world) if world.is_running() => {
                info!(
                    world = %self.settings.world_id,
                    revision = world.revision,
                    "world relaunched before shutdown completed, resuming"
                );
                self.tracker.resume(now);
                self.published_loaded = false;
                self.announced = false;
                true
            }
            Ok(_) => false,
            Err(e) => {
                log_provider_error(&e, "describe failed while shutting down");
                false
            }
        }
    }

    /// Republish the address if it differs from what DNS holds.
    async fn publish_address(&mut self, ip: IpAddr) -> bool {
        let address = ip.to_string();
        let settings = &self.settings;

        if !self.published_loaded {
            match self.dns.get_record(&settings.zone_id, &settings.record_name).await {
                Ok(record) => {
                    self.published = record.map(|r| r.address);
                    self.published_loaded = true;
                }
                Err(e) => {
                    warn!(error = %e, "could not read current DNS record");
                }
            }
        }

        if self.published.as_deref() == Some(address.as_str()) {
            self.announce(&address, false).await;
            return false;
        }

        let dns = &self.dns;
        let target = address.as_str();
        let result = retry_transient(&self.retry, "dns update", move || {
            dns.upsert_record(&settings.zone_id, &settings.record_name, target, settings.ttl)
        })
        .await;

        match result {
            Ok(change) => {
                info!(
                    record = %self.settings.record_name,
                    %address,
                    previous = ?self.published,
                    "published address"
                );
                let moved = self.published.is_some();
                self.published = Some(address.clone());
                self.published_loaded = true;
                self.announce(&address, moved).await;
                change.changed
            }
            Err(e) => {
                log_provider_error(&e, "dns update failed, retrying next cycle");
                false
            }
        }
    }

    /// Tell the webhook about the first known address, and about moves.
    async fn announce(&mut self, address: &str, moved: bool) {
        let server = self.settings.record_name.clone();
        let notice = if !self.announced {
            Notice::Started {
                server,
                address: address.to_string(),
            }
        } else if moved {
            Notice::AddressChanged {
                server,
                address: address.to_string(),
            }
        } else {
            return;
        };
        self.announced = true;
        self.notifier.notify(&notice).await;
    }

    async fn report_utilization(&mut self, now: u64) -> Option<f64> {
        let sample = match self.cpu.as_mut()?.sample() {
            Ok(sample) => sample?,
            Err(e) => {
                warn!(error = %e, "cpu sample failed");
                return None;
            }
        };
        if let Err(e) = self
            .scheduler
            .put_sample(&self.settings.world_id, sample, now)
            .await
        {
            log_provider_error(&e, "utilization report failed");
        } else {
            debug!(utilization = sample, "reported utilization");
        }
        Some(sample)
    }

    async fn request_shutdown(&mut self, idle_secs: u64) -> bool {
        let scheduler = &self.scheduler;
        let world_id = self.settings.world_id.as_str();
        let result = retry_transient(&self.retry, "scale to zero", move || {
            scheduler.set_desired_count(world_id, 0)
        })
        .await;

        match result {
            Ok(change) => {
                info!(
                    world = %self.settings.world_id,
                    idle_secs,
                    revision = change.revision,
                    "idle timeout reached, desired count set to 0"
                );
                self.tracker.mark_shutting_down();
                let notice = Notice::IdleShutdown {
                    server: self.settings.record_name.clone(),
                    idle_minutes: idle_secs / 60,
                };
                self.notifier.notify(&notice).await;
                true
            }
            Err(e) => {
                log_provider_error(&e, "scale to zero failed, retrying next cycle");
                false
            }
        }
    }

    /// Run the watchdog loop until shutdown is signalled.
    pub async fn run(&mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            world = %self.settings.world_id,
            record = %self.settings.record_name,
            interval_secs = self.settings.check_interval.as_secs(),
            idle_timeout_secs = self.settings.idle_timeout.as_secs(),
            "watchdog started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {
                    let report = self.cycle(epoch_secs()).await;
                    debug!(?report, "watchdog cycle");
                }
                _ = shutdown.changed() => {
                    info!("watchdog shutting down");
                    break;
                }
            }
        }
    }
}

fn log_provider_error(e: &ProviderError, msg: &str) {
    if e.is_access_denied() {
        error!(error = %e, "{msg}");
    } else {
        warn!(error = %e, "{msg}");
    }
}
