//! Descriptor generation, credential rotation, and health checks

use super::{HealthState, IceServerDescriptor};
use crate::config::IceProviderConfig;
use crate::monitor::{FaultClassifier, FaultKind};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Per-server probe outcome
#[derive(Debug, Clone, Copy)]
struct ProbeRecord {
    state: HealthState,
    last_rtt: Option<Duration>,
    last_checked: Option<DateTime<Utc>>,
}

impl Default for ProbeRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unchecked,
            last_rtt: None,
            last_checked: None,
        }
    }
}

/// Snapshot served to readers; swapped whole so reads are never torn
struct Snapshot {
    relay: Vec<IceServerDescriptor>,
    rotated_at: Option<DateTime<Utc>>,
}

/// Reachability probe seam; the default implementation does a bounded TCP
/// connect, tests substitute their own
#[async_trait]
pub trait ServerProber: Send + Sync {
    /// Probe the given server URL; returns measured round-trip time
    async fn probe(&self, url: &str) -> Result<Duration>;
}

/// TCP-connect reachability prober
///
/// A coarse heuristic: STUN/TURN speak UDP first, but an unreachable or
/// down host fails a TCP connect too, which is what the health cache wants
/// to know.
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Create a prober with the given per-probe timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn host_port(url: &str) -> Result<String> {
        let trimmed = url
            .trim_start_matches("stun:")
            .trim_start_matches("stuns:")
            .trim_start_matches("turn:")
            .trim_start_matches("turns:");
        // Strip any ?transport=... suffix
        let trimmed = trimmed.split('?').next().unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(Error::InvalidConfig(format!("unparseable ICE URL: {}", url)));
        }
        if trimmed.contains(':') {
            Ok(trimmed.to_string())
        } else {
            Ok(format!("{}:3478", trimmed))
        }
    }
}

#[async_trait]
impl ServerProber for TcpProber {
    async fn probe(&self, url: &str) -> Result<Duration> {
        let addr = Self::host_port(url)?;
        let started = std::time::Instant::now();

        let connect = tokio::net::TcpStream::connect(&addr);
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_stream)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(Error::Transport(format!("probe {} failed: {}", addr, e))),
            Err(_) => Err(Error::Transport(format!("probe {} timed out", addr))),
        }
    }
}

/// Provider health/rotation status for the metrics surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct IceProviderStatus {
    /// Last successful rotation time
    pub rotated_at: Option<DateTime<Utc>>,
    /// Per-URL health state
    pub server_health: HashMap<String, HealthState>,
}

/// Credential/ICE provider
///
/// Constructed explicitly and owned by the hub's startup routine; there is
/// no ambient instance.
pub struct IceProvider {
    config: IceProviderConfig,
    prober: Arc<dyn ServerProber>,
    snapshot: RwLock<Snapshot>,
    health: RwLock<HashMap<String, ProbeRecord>>,
    faults: RwLock<Option<Arc<FaultClassifier>>>,
}

impl IceProvider {
    /// Create a provider with the default TCP prober
    pub fn new(config: IceProviderConfig) -> Arc<Self> {
        let timeout = config.probe_timeout();
        Self::with_prober(config, Arc::new(TcpProber::new(timeout)))
    }

    /// Create a provider with a custom prober
    pub fn with_prober(config: IceProviderConfig, prober: Arc<dyn ServerProber>) -> Arc<Self> {
        let provider = Arc::new(Self {
            config,
            prober,
            snapshot: RwLock::new(Snapshot {
                relay: Vec::new(),
                rotated_at: None,
            }),
            health: RwLock::new(HashMap::new()),
            faults: RwLock::new(None),
        });
        // Initial credential generation; failure leaves an empty relay list
        // that the first timer tick retries.
        if let Err(e) = provider.rotate() {
            warn!("initial relay credential generation failed: {}", e);
        }
        provider
    }

    /// Attach a fault classifier for degradation reporting
    pub fn set_fault_sink(&self, faults: Arc<FaultClassifier>) {
        *self.faults.write() = Some(faults);
    }

    /// Generate the relay credential pair for the given expiry instant.
    ///
    /// The username embeds the expiry so the relay infrastructure can verify
    /// the credential with nothing but the shared secret; the credential is
    /// a deterministic HMAC over the username.
    pub fn relay_credentials(&self, expires_at: DateTime<Utc>) -> Result<(String, String)> {
        if self.config.shared_secret.is_empty() {
            return Err(Error::InvalidConfig(
                "relay credentials require a shared secret".to_string(),
            ));
        }

        let username = format!("{}:{}", expires_at.timestamp(), self.config.account_tag);

        let mut mac = HmacSha256::new_from_slice(self.config.shared_secret.as_bytes())
            .map_err(|e| Error::InvalidConfig(format!("bad HMAC key: {}", e)))?;
        mac.update(username.as_bytes());
        let credential = BASE64.encode(mac.finalize().into_bytes());

        Ok((username, credential))
    }

    /// Regenerate all relay descriptors into a fresh snapshot.
    ///
    /// On failure the last valid snapshot keeps serving and a fault event is
    /// reported; ongoing calls are never blocked on rotation.
    pub fn rotate(&self) -> Result<()> {
        if self.config.turn_urls.is_empty() {
            let mut snap = self.snapshot.write();
            snap.rotated_at = Some(Utc::now());
            return Ok(());
        }

        let expires_at = Utc::now()
            + ChronoDuration::seconds(self.config.credential_ttl_secs as i64);

        let mut relay = Vec::with_capacity(self.config.turn_urls.len());
        for url in &self.config.turn_urls {
            let (username, credential) = self.relay_credentials(expires_at)?;
            relay.push(IceServerDescriptor::relay(
                url.clone(),
                username,
                credential,
                expires_at,
            ));
        }

        let mut snap = self.snapshot.write();
        snap.relay = relay;
        snap.rotated_at = Some(Utc::now());
        info!(
            relay_servers = snap.relay.len(),
            expires_at = %expires_at,
            "relay credentials rotated"
        );
        Ok(())
    }

    /// Operational override; same path as the scheduled timer,
    /// last-write-wins
    pub fn force_rotate(&self) {
        if let Err(e) = self.rotate() {
            warn!("credential rotation failed, serving last-known-good: {}", e);
            if let Some(faults) = self.faults.read().as_ref() {
                faults.record(FaultKind::Network, format!("credential rotation failed: {}", e));
            }
        }
    }

    /// Probe every configured server once and update the health cache
    pub async fn health_check(&self) {
        let urls: Vec<String> = self
            .config
            .stun_urls
            .iter()
            .chain(self.config.turn_urls.iter())
            .cloned()
            .collect();

        for url in urls {
            let result = self.prober.probe(&url).await;
            let mut health = self.health.write();
            let record = health.entry(url.clone()).or_default();
            record.last_checked = Some(Utc::now());
            match result {
                Ok(rtt) => {
                    record.state = HealthState::Healthy;
                    record.last_rtt = Some(rtt);
                    debug!(url = %url, rtt_ms = rtt.as_millis() as u64, "ICE server healthy");
                }
                Err(e) => {
                    record.state = HealthState::Unhealthy;
                    warn!(url = %url, "ICE server marked unhealthy: {}", e);
                }
            }
        }
    }

    /// Operational override; shares state with the scheduled probe
    pub async fn force_health_check(&self) {
        self.health_check().await;
    }

    /// Ordered descriptor list: reflection first, sorted by last measured
    /// probe RTT (never-probed servers sort last among them), capped at
    /// `max_stun_servers`; relay descriptors follow.
    pub fn descriptors(&self) -> Vec<IceServerDescriptor> {
        let health = self.health.read();

        let mut reflection: Vec<(IceServerDescriptor, Option<Duration>)> = self
            .config
            .stun_urls
            .iter()
            .map(|url| {
                let rtt = health.get(url).and_then(|r| r.last_rtt);
                (IceServerDescriptor::reflection(url.clone()), rtt)
            })
            .collect();
        reflection.sort_by_key(|(_, rtt)| rtt.unwrap_or(Duration::MAX));
        reflection.truncate(self.config.max_stun_servers);

        let snap = self.snapshot.read();
        reflection
            .into_iter()
            .map(|(desc, _)| desc)
            .chain(snap.relay.iter().cloned())
            .collect()
    }

    /// `descriptors()` minus servers last marked unhealthy
    pub fn healthy_descriptors(&self) -> Vec<IceServerDescriptor> {
        let descriptors = self.descriptors();
        let health = self.health.read();
        descriptors
            .into_iter()
            .filter(|desc| {
                health
                    .get(&desc.url)
                    .map(|r| r.state.is_served())
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Rotation/health status for the metrics surface
    pub fn status(&self) -> IceProviderStatus {
        let health = self.health.read();
        IceProviderStatus {
            rotated_at: self.snapshot.read().rotated_at,
            server_health: health
                .iter()
                .map(|(url, record)| (url.clone(), record.state))
                .collect(),
        }
    }

    /// Spawn the rotation timer
    pub fn spawn_rotation(self: &Arc<Self>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        let interval = Duration::from_secs(provider.config.rotation_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick already rotated at construction
            loop {
                ticker.tick().await;
                provider.force_rotate();
            }
        })
    }

    /// Spawn the health-check timer
    pub fn spawn_health_checks(self: &Arc<Self>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        let interval = Duration::from_secs(provider.config.health_check_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                provider.health_check().await;
            }
        })
    }
}
