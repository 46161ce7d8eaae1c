//! Player activity and public address probes.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use dormant_core::{PortMapping, Protocol};

use crate::error::ProbeError;

/// Answers "is anyone playing right now?".
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn is_active(&self) -> Result<bool, ProbeError>;
}

/// Answers "where can players reach this instance?".
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn public_address(&self) -> Result<Option<IpAddr>, ProbeError>;
}

// ── Connection table ──────────────────────────────────────────────

/// Default number of UDP datagrams per observation that counts as play.
pub const DEFAULT_MIN_DATAGRAMS: u64 = 50;

/// Detects players from the kernel's network tables.
///
/// TCP game ports count established sockets with a remote peer. UDP game
/// servers answer every player from one unconnected socket, so UDP play is
/// detected from traffic instead: a replied conntrack flow to a game port,
/// or at least `min_datagrams` datagrams received since the previous
/// observation. The first observation only primes the datagram counter and
/// reports unknown unless another signal already shows a player.
#[derive(Debug)]
pub struct ConnectionTableProbe {
    ports: Vec<PortMapping>,
    root: PathBuf,
    min_datagrams: u64,
    last_datagrams: Mutex<Option<u64>>,
}

const TCP_ESTABLISHED: &str = "01";

impl ConnectionTableProbe {
    pub fn new(ports: Vec<PortMapping>) -> Self {
        Self::with_root(ports, "/proc/net")
    }

    /// Read tables from `root` instead of `/proc/net`.
    pub fn with_root(ports: Vec<PortMapping>, root: impl Into<PathBuf>) -> Self {
        Self {
            ports,
            root: root.into(),
            min_datagrams: DEFAULT_MIN_DATAGRAMS,
            last_datagrams: Mutex::new(None),
        }
    }

    pub fn with_min_datagrams(mut self, min_datagrams: u64) -> Self {
        self.min_datagrams = min_datagrams.max(1);
        self
    }

    fn ports_for(&self, protocol: Protocol) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|p| p.protocol == protocol)
            .map(|p| p.port)
            .collect()
    }

    /// Established TCP peers across the TCP game ports.
    pub fn count_tcp_peers(&self) -> Result<usize, ProbeError> {
        let ports = self.ports_for(Protocol::Tcp);
        if ports.is_empty() {
            return Ok(0);
        }
        let mut total = 0;
        for table in ["tcp", "tcp6"] {
            let path = self.root.join(table);
            let Some(content) = read_optional(&path)? else {
                continue;
            };
            total += count_tcp_peers(&content, &ports)?;
        }
        Ok(total)
    }

    /// Replied UDP flows to a game port, or `None` without connection tracking.
    pub fn count_udp_flows(&self) -> Result<Option<usize>, ProbeError> {
        let ports = self.ports_for(Protocol::Udp);
        if ports.is_empty() {
            return Ok(Some(0));
        }
        for table in ["nf_conntrack", "ip_conntrack"] {
            if let Some(content) = read_optional(&self.root.join(table))? {
                return Ok(Some(count_udp_flows(&content, &ports)));
            }
        }
        Ok(None)
    }

    /// UDP datagrams received since the previous call.
    ///
    /// `None` on the first call and after a counter reset.
    pub fn datagrams_since_last(&self) -> Result<Option<u64>, ProbeError> {
        let snmp_path = self.root.join("snmp");
        let snmp = read_optional(&snmp_path)?.ok_or_else(|| ProbeError::Io {
            path: snmp_path.clone(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        let mut current = udp_in_datagrams(&snmp)?;
        if let Some(snmp6) = read_optional(&self.root.join("snmp6"))? {
            current += udp6_in_datagrams(&snmp6)?;
        }

        let mut last = self
            .last_datagrams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = last.replace(current);
        Ok(previous.and_then(|prev| current.checked_sub(prev)))
    }
}

/// Missing tables (no IPv6 stack, no conntrack) read as absent.
fn read_optional(path: &Path) -> Result<Option<String>, ProbeError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ProbeError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Count established rows with a remote peer on one of `ports`.
fn count_tcp_peers(table: &str, ports: &[u16]) -> Result<usize, ProbeError> {
    let mut count = 0;
    // First line is the column header.
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (local, remote, state) = (fields[1], fields[2], fields[3]);

        let local_port = hex_port(local).ok_or_else(|| ProbeError::Parse {
            what: "connection table row",
            line: line.to_string(),
        })?;
        if !ports.contains(&local_port) || state != TCP_ESTABLISHED || is_unspecified(remote) {
            continue;
        }
        count += 1;
    }
    Ok(count)
}

fn hex_port(endpoint: &str) -> Option<u16> {
    let (_, port) = endpoint.rsplit_once(':')?;
    u16::from_str_radix(port, 16).ok()
}

fn is_unspecified(endpoint: &str) -> bool {
    let addr = endpoint.split(':').next().unwrap_or_default();
    addr.chars().all(|c| c == '0')
}

/// Count UDP conntrack entries whose original destination is a game port.
///
/// Unreplied flows are skipped: a scanner sending to the port is not a player.
fn count_udp_flows(table: &str, ports: &[u16]) -> usize {
    table
        .lines()
        .filter(|line| {
            let mut fields = line.split_whitespace();
            if !fields.any(|f| f == "udp") || line.contains("[UNREPLIED]") {
                return false;
            }
            // The first dport= belongs to the original direction.
            line.split_whitespace()
                .find_map(|f| f.strip_prefix("dport="))
                .and_then(|p| p.parse::<u16>().ok())
                .is_some_and(|port| ports.contains(&port))
        })
        .count()
}

/// `InDatagrams` from the `Udp:` header/value line pair of `/proc/net/snmp`.
fn udp_in_datagrams(snmp: &str) -> Result<u64, ProbeError> {
    let mut udp_lines = snmp.lines().filter(|l| l.starts_with("Udp: "));
    let (Some(header), Some(values)) = (udp_lines.next(), udp_lines.next()) else {
        return Err(ProbeError::Parse {
            what: "/proc/net/snmp",
            line: "missing Udp section".to_string(),
        });
    };
    header
        .split_whitespace()
        .zip(values.split_whitespace())
        .find(|(name, _)| *name == "InDatagrams")
        .and_then(|(_, value)| value.parse().ok())
        .ok_or_else(|| ProbeError::Parse {
            what: "/proc/net/snmp Udp line",
            line: values.to_string(),
        })
}

fn udp6_in_datagrams(snmp6: &str) -> Result<u64, ProbeError> {
    for line in snmp6.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() == Some("Udp6InDatagrams") {
            return fields
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| ProbeError::Parse {
                    what: "/proc/net/snmp6",
                    line: line.to_string(),
                });
        }
    }
    Ok(0)
}

#[async_trait]
impl ActivitySource for ConnectionTableProbe {
    async fn is_active(&self) -> Result<bool, ProbeError> {
        let tcp_peers = self.count_tcp_peers()?;
        let udp_flows = self.count_udp_flows()?;
        let has_udp = self.ports.iter().any(|p| p.protocol == Protocol::Udp);
        let datagrams = if has_udp {
            self.datagrams_since_last()?
        } else {
            Some(0)
        };
        debug!(tcp_peers, ?udp_flows, ?datagrams, "connection table probe");

        if tcp_peers > 0 || udp_flows.unwrap_or(0) > 0 {
            return Ok(true);
        }
        match datagrams {
            Some(_) if !has_udp => Ok(false),
            Some(count) => Ok(count >= self.min_datagrams),
            None => Err(ProbeError::NoBaseline("udp datagram counter")),
        }
    }
}

// ── Addresses ─────────────────────────────────────────────────────

/// A fixed address, for hosts whose public IP is known at deploy time.
#[derive(Debug, Clone)]
pub struct StaticAddress(pub Option<IpAddr>);

#[async_trait]
impl AddressSource for StaticAddress {
    async fn public_address(&self) -> Result<Option<IpAddr>, ProbeError> {
        Ok(self.0)
    }
}

/// Reads the address from an instance metadata endpoint that returns the
/// bare IP as its body.
#[derive(Debug, Clone)]
pub struct MetadataAddress {
    authority: String,
    uri: String,
    timeout: Duration,
}

impl MetadataAddress {
    pub fn new(url: &str) -> Result<Self, ProbeError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ProbeError::Lookup(format!("metadata url {url}: {e}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| ProbeError::Lookup(format!("metadata url {url}: missing host")))?
            .to_string();
        Ok(Self {
            authority,
            uri: url.to_string(),
            timeout: Duration::from_secs(2),
        })
    }

    async fn fetch(&self) -> Result<String, ProbeError> {
        let lookup = |e: String| ProbeError::Lookup(format!("{}: {e}", self.uri));

        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| lookup(e.to_string()))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| lookup(e.to_string()))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&self.uri)
            .header("host", &self.authority)
            .header("user-agent", "dormant-watchdog/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| lookup(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| lookup(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(lookup(format!("status {}", resp.status())));
        }
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| lookup(e.to_string()))?
            .to_bytes();
        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }
}

#[async_trait]
impl AddressSource for MetadataAddress {
    async fn public_address(&self) -> Result<Option<IpAddr>, ProbeError> {
        let body = tokio::time::timeout(self.timeout, self.fetch())
            .await
            .map_err(|_| ProbeError::Lookup(format!("{}: timed out", self.uri)))??;
        if body.is_empty() {
            return Ok(None);
        }
        body.parse::<IpAddr>()
            .map(Some)
            .map_err(|_| ProbeError::Parse {
                what: "metadata address",
                line: body,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n";

    fn udp(port: u16) -> PortMapping {
        PortMapping {
            port,
            protocol: Protocol::Udp,
        }
    }

    fn tcp(port: u16) -> PortMapping {
        PortMapping {
            port,
            protocol: Protocol::Tcp,
        }
    }

    const SNMP_HEADER: &str = "Ip: Forwarding DefaultTTL\nIp: 1 64\nUdp: InDatagrams NoPorts InErrors OutDatagrams RcvbufErrors SndbufErrors InCsumErrors IgnoredMulti MemErrors\n";

    fn snmp(in_datagrams: u64) -> String {
        format!("{SNMP_HEADER}Udp: {in_datagrams} 0 0 10 0 0 0 0 0\nUdpLite: InDatagrams NoPorts\nUdpLite: 0 0\n")
    }

    #[test]
    fn listening_tcp_sockets_are_not_players() {
        // 0x2329 = 9001, listening.
        let table = format!("{HEADER}   0: 00000000:2329 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000 0 100 2\n");
        assert_eq!(count_tcp_peers(&table, &[9001]).unwrap(), 0);
    }

    #[test]
    fn tcp_requires_established() {
        // State 06 is TIME_WAIT.
        let table = format!(
            "{HEADER}   0: 0A00000A:2329 4F01A8C0:D431 06 00000000:00000000 00:00000000 00000000  0 0 100 2\n   1: 0A00000A:2329 4F01A8C0:D432 01 00000000:00000000 00:00000000 00000000  0 0 101 2\n   2: 0A00000A:0016 4F01A8C0:D433 01 00000000:00000000 00:00000000 00000000  0 0 102 2\n"
        );
        assert_eq!(count_tcp_peers(&table, &[9001]).unwrap(), 1);
    }

    #[test]
    fn ipv6_tcp_rows_parse() {
        // 0x0998 = 2456
        let table = format!(
            "{HEADER}   0: 00000000000000000000000000000000:0998 0000000000000000FFFF00004F01A8C0:D431 01 00000000:00000000 00:00000000 00000000  0 0 100 2\n"
        );
        assert_eq!(count_tcp_peers(&table, &[2456]).unwrap(), 1);
    }

    #[test]
    fn malformed_row_is_an_error() {
        let table = format!("{HEADER}   0: garbage more fields here\n");
        assert!(count_tcp_peers(&table, &[7777]).is_err());
    }

    #[test]
    fn conntrack_counts_replied_flows_to_game_ports() {
        let table = "\
ipv4     2 udp      17 170 src=81.2.69.1 dst=10.0.0.10 sport=51234 dport=2456 packets=900 bytes=80000 src=10.0.0.10 dst=81.2.69.1 sport=2456 dport=51234 packets=850 bytes=90000 [ASSURED] mark=0 zone=0 use=2
ipv4     2 udp      17 25 src=81.2.69.9 dst=10.0.0.10 sport=40000 dport=2456 packets=1 bytes=40 [UNREPLIED] src=10.0.0.10 dst=81.2.69.9 sport=2456 dport=40000 packets=0 bytes=0 mark=0 zone=0 use=2
ipv4     2 udp      17 20 src=10.0.0.10 dst=10.0.0.2 sport=53011 dport=53 packets=1 bytes=60 src=10.0.0.2 dst=10.0.0.10 sport=53 dport=53011 packets=1 bytes=120 mark=0 zone=0 use=2
ipv4     2 tcp      6 431999 ESTABLISHED src=81.2.69.1 dst=10.0.0.10 sport=50000 dport=2456 packets=5 bytes=300 src=10.0.0.10 dst=81.2.69.1 sport=2456 dport=50000 packets=5 bytes=300 [ASSURED] mark=0 zone=0 use=2
";
        assert_eq!(count_udp_flows(table, &[2456, 2457]), 1);
        assert_eq!(count_udp_flows(table, &[7777]), 0);
    }

    #[test]
    fn snmp_counters_parse() {
        assert_eq!(udp_in_datagrams(&snmp(12345)).unwrap(), 12345);
        assert!(udp_in_datagrams("Ip: 1\n").is_err());
        assert_eq!(
            udp6_in_datagrams("Ip6InReceives 10\nUdp6InDatagrams \t 77\nUdp6NoPorts 0\n").unwrap(),
            77
        );
        assert_eq!(udp6_in_datagrams("Ip6InReceives 10\n").unwrap(), 0);
    }

    #[tokio::test]
    async fn unconnected_udp_server_with_traffic_is_active() {
        let dir = tempfile::tempdir().unwrap();
        // The only socket row is the unconnected server socket on 7777.
        std::fs::write(
            dir.path().join("udp"),
            format!("{HEADER}   0: 00000000:1E61 00000000:0000 07 00000000:00000000 00:00000000 00000000  1000 0 100 2\n"),
        )
        .unwrap();
        std::fs::write(dir.path().join("snmp"), snmp(1000)).unwrap();

        let probe = ConnectionTableProbe::with_root(vec![udp(7777)], dir.path());
        // First observation primes the counter.
        assert!(matches!(probe.is_active().await, Err(ProbeError::NoBaseline(_))));

        std::fs::write(dir.path().join("snmp"), snmp(1000 + 1200)).unwrap();
        assert!(probe.is_active().await.unwrap());

        // A handful of stray datagrams is not a player.
        std::fs::write(dir.path().join("snmp"), snmp(2200 + 3)).unwrap();
        assert!(!probe.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn conntrack_flow_is_active_without_baseline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("snmp"), snmp(10)).unwrap();
        std::fs::write(
            dir.path().join("nf_conntrack"),
            "ipv4     2 udp      17 170 src=81.2.69.1 dst=10.0.0.10 sport=51234 dport=7777 packets=9 bytes=800 src=10.0.0.10 dst=81.2.69.1 sport=7777 dport=51234 packets=8 bytes=900 [ASSURED] mark=0 zone=0 use=2\n",
        )
        .unwrap();

        let probe = ConnectionTableProbe::with_root(vec![udp(7777)], dir.path());
        assert_eq!(probe.count_udp_flows().unwrap(), Some(1));
        assert!(probe.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn tcp_only_world_reads_socket_tables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tcp"),
            format!("{HEADER}   0: 0A00000A:2329 4F01A8C0:D431 01 00000000:00000000 00:00000000 00000000  1000 0 100 2\n"),
        )
        .unwrap();
        // No tcp6, snmp, or conntrack tables.

        let probe = ConnectionTableProbe::with_root(vec![tcp(9001)], dir.path());
        assert_eq!(probe.count_tcp_peers().unwrap(), 1);
        assert!(probe.is_active().await.unwrap());

        let idle = ConnectionTableProbe::with_root(vec![tcp(9002)], dir.path());
        assert!(!idle.is_active().await.unwrap());
    }

    #[tokio::test]
    async fn static_address() {
        let addr: IpAddr = "3.3.3.3".parse().unwrap();
        assert_eq!(StaticAddress(Some(addr)).public_address().await.unwrap(), Some(addr));
    }

    #[test]
    fn metadata_url_needs_host() {
        assert!(MetadataAddress::new("http://169.254.169.254/latest/meta-data/public-ipv4").is_ok());
        assert!(MetadataAddress::new("/no-host").is_err());
    }
}
