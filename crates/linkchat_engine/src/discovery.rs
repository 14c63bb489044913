//! Peer discovery via bounded connect-probes.
//!
//! There is no central directory: a scan probes a candidate address set
//! (configured known-likely addresses plus a sweep of the local /24) by
//! attempting the real connection with a short timeout and closing it
//! immediately. Results are a push stream — each reachable candidate is
//! reported the moment its probe completes, not in a batch at the end.
//! The scan stops issuing new probes once the overall ceiling elapses;
//! probes already in flight are allowed to finish. De-duplication of
//! peers found by earlier scans is the subscriber's responsibility.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::duration_serde;
use crate::event::{EngineEvent, EventBus};
use crate::peer::Peer;
use crate::transport::{ChannelWriter, Transport};

/// Discovery scan settings. All knobs are explicit configuration; nothing
/// here is hardcoded into the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Port probed on each candidate. Matches the service port: a probe
    /// tests reachability by attempting the real connection.
    pub probe_port: u16,

    /// Per-probe connect timeout. An unreachable candidate must never
    /// stall the scan.
    #[serde(with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Overall scan ceiling. After this elapses no new probes are issued;
    /// in-flight probes finish.
    #[serde(with = "duration_serde")]
    pub scan_ceiling: Duration,

    /// Worker limit for concurrent probes, bounding fan-out on large
    /// subnets.
    pub max_concurrent_probes: usize,

    /// Known-likely addresses probed ahead of the subnet sweep
    /// (plain IPs; the probe port is appended).
    pub extra_candidates: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_port: 8888,
            probe_timeout: Duration::from_secs(1),
            scan_ceiling: Duration::from_secs(8),
            max_concurrent_probes: 32,
            extra_candidates: Vec::new(),
        }
    }
}

/// Build the candidate set: extras first, then the local /24 sweep
/// (IPv4 only), skipping the local address and duplicates.
pub(crate) fn candidate_set(config: &DiscoveryConfig, local_ip: IpAddr) -> Vec<SocketAddr> {
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::new();

    for entry in &config.extra_candidates {
        match entry.parse::<IpAddr>() {
            Ok(ip) if ip != local_ip => {
                if seen.insert(ip) {
                    candidates.push(SocketAddr::new(ip, config.probe_port));
                }
            }
            Ok(_) => {}
            Err(e) => warn!("ignoring unparsable discovery candidate {entry:?}: {e}"),
        }
    }

    if let IpAddr::V4(v4) = local_ip {
        let [a, b, c, _] = v4.octets();
        for host in 1..=254u8 {
            let ip = IpAddr::V4(std::net::Ipv4Addr::new(a, b, c, host));
            if ip == local_ip || !seen.insert(ip) {
                continue;
            }
            candidates.push(SocketAddr::new(ip, config.probe_port));
        }
    }

    candidates
}

/// Launch a scan in the background. Returns immediately; discovered peers
/// arrive as [`EngineEvent::DeviceDiscovered`] and the scan signs off with
/// [`EngineEvent::DiscoveryFinished`].
pub(crate) fn start_scan<T: Transport>(
    transport: Arc<T>,
    config: DiscoveryConfig,
    local_ip: IpAddr,
    events: EventBus,
    shutdown: broadcast::Receiver<()>,
) {
    tokio::spawn(scan(transport, config, local_ip, events, shutdown));
}

async fn scan<T: Transport>(
    transport: Arc<T>,
    config: DiscoveryConfig,
    local_ip: IpAddr,
    events: EventBus,
    mut shutdown: broadcast::Receiver<()>,
) {
    let candidates = candidate_set(&config, local_ip);
    info!(
        "discovery scan started: {} candidates, probe timeout {:?}, ceiling {:?}",
        candidates.len(),
        config.probe_timeout,
        config.scan_ceiling
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
    let deadline = Instant::now() + config.scan_ceiling;
    let found = Arc::new(AtomicUsize::new(0));
    let mut probes = Vec::new();

    for target in candidates {
        // Stop issuing once the ceiling elapses; in-flight probes finish.
        // Polled in priority order so an elapsed ceiling always wins over
        // an available permit.
        let permit = tokio::select! {
            biased;
            _ = shutdown.recv() => {
                debug!("discovery scan cancelled by shutdown");
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                debug!("scan ceiling reached, no further probes issued");
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let transport = Arc::clone(&transport);
        let events = events.clone();
        let found = Arc::clone(&found);
        let probe_timeout = config.probe_timeout;
        probes.push(tokio::spawn(async move {
            let _permit = permit;
            if probe(transport.as_ref(), target, probe_timeout).await {
                debug!("device found at {target}");
                found.fetch_add(1, Ordering::Relaxed);
                events.publish(EngineEvent::DeviceDiscovered(Peer::discovered(
                    target.ip().to_string(),
                )));
            }
        }));
    }

    for handle in probes {
        let _ = handle.await;
    }

    let peers_found = found.load(Ordering::Relaxed);
    info!("discovery scan finished: {peers_found} peer(s) found");
    events.publish(EngineEvent::DiscoveryFinished { peers_found });
}

/// A single connect-and-close reachability probe.
async fn probe<T: Transport>(transport: &T, target: SocketAddr, timeout: Duration) -> bool {
    match transport.connect(target, timeout).await {
        Ok(channel) => {
            let (_, mut writer) = channel.split();
            let _ = writer.shutdown().await;
            true
        }
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
