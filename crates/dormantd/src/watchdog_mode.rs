//! Watchdog mode: the sidecar next to one game server.
//!
//! Everything comes from the environment set at deploy time. The sidecar
//! talks to the control plane's provider API with its own token, so it can
//! only touch the world it was granted.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use tokio::sync::watch;
use tracing::{error, info, warn};

use dormant_core::{PortMapping, epoch_secs};
use dormant_provider::{HttpProvider, RetryPolicy, ServiceScheduler, WorldRecord, retry_transient};
use dormant_watchdog::{
    AddressSource, ConnectionTableProbe, CpuSampler, DEFAULT_MIN_DATAGRAMS, MetadataAddress,
    Notifier, StaticAddress, Watchdog, WatchdogSettings,
};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Args, Debug)]
pub struct WatchdogArgs {
    /// World id. When unset the world is found by cluster and service.
    #[arg(long, env = "WORLD")]
    world: Option<String>,

    #[arg(long, env = "CLUSTER")]
    cluster: Option<String>,

    #[arg(long, env = "SERVICE")]
    service: Option<String>,

    /// Hosted zone holding the server's record.
    #[arg(long, env = "DNSZONE")]
    dns_zone: String,

    /// DNS name players connect to.
    #[arg(long, env = "SERVERNAME")]
    server_name: String,

    #[arg(long, env = "DISCORDWEBHOOK")]
    webhook: Option<String>,

    #[arg(long, env = "PROVIDER_URL", default_value = "http://127.0.0.1:8480")]
    provider_url: String,

    #[arg(long, env = "PROVIDER_TOKEN")]
    provider_token: Option<String>,

    /// Game ports to watch, e.g. `2456/udp,2457/udp`.
    #[arg(long, env = "GAME_PORTS", value_delimiter = ',', required = true)]
    game_ports: Vec<PortMapping>,

    #[arg(long, env = "IDLE_MINUTES", default_value = "15")]
    idle_minutes: u64,

    /// How long to wait for the first player after start.
    #[arg(long, env = "GRACE_MINUTES", default_value = "10")]
    grace_minutes: u64,

    #[arg(long, env = "CHECK_INTERVAL_SECS", default_value = "60")]
    check_interval_secs: u64,

    /// UDP datagrams per check interval that count as players being online.
    #[arg(long, env = "UDP_MIN_DATAGRAMS", default_value_t = DEFAULT_MIN_DATAGRAMS)]
    udp_min_datagrams: u64,

    /// Fixed public address; takes precedence over the metadata lookup.
    #[arg(long, env = "PUBLIC_IP")]
    public_ip: Option<IpAddr>,

    /// Endpoint returning this instance's public IP as plain text.
    #[arg(long, env = "METADATA_URL")]
    metadata_url: Option<String>,
}

pub async fn run_watchdog(args: WatchdogArgs) -> anyhow::Result<()> {
    info!("dormant daemon starting in watchdog mode");

    let provider = Arc::new(HttpProvider::new(&args.provider_url, args.provider_token.clone())?);
    let retry = RetryPolicy::default();
    let world = resolve_world(provider.as_ref(), &args, &retry).await?;
    info!(world = %world.id, cluster = %world.cluster, service = %world.service, "world resolved");

    let address: Box<dyn AddressSource> = match (args.public_ip, &args.metadata_url) {
        (Some(ip), _) => Box::new(StaticAddress(Some(ip))),
        (None, Some(url)) => Box::new(MetadataAddress::new(url)?),
        (None, None) => {
            warn!("neither PUBLIC_IP nor METADATA_URL set; DNS will not be updated");
            Box::new(StaticAddress(None))
        }
    };

    let mut settings = WatchdogSettings::new(&world.id, &args.dns_zone, &args.server_name);
    settings.ttl = world.dns.ttl;
    settings.check_interval = Duration::from_secs(args.check_interval_secs.max(1));
    settings.idle_timeout = Duration::from_secs(args.idle_minutes * 60);
    settings.startup_grace = Duration::from_secs(args.grace_minutes * 60);

    let mut watchdog = Watchdog::new(
        settings,
        provider.clone(),
        provider,
        Box::new(ConnectionTableProbe::new(args.game_ports).with_min_datagrams(args.udp_min_datagrams)),
        address,
        epoch_secs(),
    )
    .with_cpu(CpuSampler::new())
    .with_notifier(Notifier::new(args.webhook, WEBHOOK_TIMEOUT))
    .with_retry(retry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    watchdog.run(shutdown_rx).await;
    info!("watchdog stopped");
    Ok(())
}

async fn resolve_world(
    provider: &HttpProvider,
    args: &WatchdogArgs,
    retry: &RetryPolicy,
) -> anyhow::Result<WorldRecord> {
    if let Some(id) = &args.world {
        let world = retry_transient(retry, "describe world", || provider.describe(id))
            .await
            .with_context(|| format!("describe world {id}"))?;
        return Ok(world);
    }

    let (Some(cluster), Some(service)) = (&args.cluster, &args.service) else {
        bail!("set WORLD, or CLUSTER and SERVICE");
    };
    let worlds = retry_transient(retry, "list worlds", || provider.list_worlds())
        .await
        .context("list worlds")?;
    worlds
        .into_iter()
        .find(|w| &w.cluster == cluster && &w.service == service)
        .with_context(|| format!("no world visible for cluster {cluster} service {service}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use dormant_core::Protocol;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: WatchdogArgs,
    }

    #[test]
    fn parses_port_list_and_defaults() {
        let cli = Cli::try_parse_from([
            "watchdog",
            "--world",
            "sat",
            "--dns-zone",
            "Z1",
            "--server-name",
            "sat.example.com",
            "--game-ports",
            "2456/udp,2457,9001/tcp",
        ])
        .unwrap();
        let args = cli.args;
        assert_eq!(args.game_ports.len(), 3);
        assert_eq!(args.game_ports[1].protocol, Protocol::Udp);
        assert_eq!(args.game_ports[2].protocol, Protocol::Tcp);
        assert_eq!(args.idle_minutes, 15);
        assert_eq!(args.check_interval_secs, 60);
        assert_eq!(args.udp_min_datagrams, 50);
        assert_eq!(args.provider_url, "http://127.0.0.1:8480");
    }

    #[test]
    fn rejects_bad_port() {
        let result = Cli::try_parse_from([
            "watchdog",
            "--dns-zone",
            "Z1",
            "--server-name",
            "x",
            "--game-ports",
            "70000/udp",
        ]);
        assert!(result.is_err());
    }
}
