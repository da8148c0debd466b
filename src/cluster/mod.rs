//! Peer discovery and best-effort UDP gossip between instances.
//!
//! The coordinator never blocks request handling. Every socket failure is
//! logged and dropped; the durable store stays authoritative, so a lost
//! notice only delays how soon a peer reloads.

pub mod discovery;
pub mod message;
pub mod net;

pub use discovery::{Discovery, KubernetesQuery, PlatformQuery, filter_peers};
pub use message::{GossipMessage, MAX_DATAGRAM, MessageError};

use serde::Serialize;
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, warn};

pub const DEFAULT_GOSSIP_PORT: u16 = 8671;

const FEED_CAPACITY: usize = 64;

/// Partition names received in invalidation notices, in arrival order.
pub type InvalidationFeed = mpsc::Receiver<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Bootstrapping,
    Discovering,
    Joined,
}

/// Gossip transport. Only UDP exists; anything else is a startup error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported gossip protocol {0:?}, only \"udp\" is available")]
pub struct UnsupportedTransport(pub String);

impl FromStr for Transport {
    type Err = UnsupportedTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else {
            Err(UnsupportedTransport(s.to_string()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct GossipConfig {
    port: u16,
    broadcast: Option<IpAddr>,
    local_ip: Option<IpAddr>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GOSSIP_PORT)
    }
}

impl GossipConfig {
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            broadcast: None,
            local_ip: None,
        }
    }

    /// Extra destination for every outgoing message, e.g. a subnet broadcast.
    #[must_use]
    pub const fn with_broadcast(mut self, broadcast: Option<IpAddr>) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Skip outbound IP detection.
    #[must_use]
    pub const fn with_local_ip(mut self, local_ip: IpAddr) -> Self {
        self.local_ip = Some(local_ip);
        self
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    pub state: ClusterState,
    pub local_ip: String,
    pub gossip_port: u16,
    pub peers: Vec<String>,
}

pub struct ClusterCoordinator {
    port: u16,
    broadcast: Option<IpAddr>,
    local_ip: IpAddr,
    state: RwLock<ClusterState>,
    peers: RwLock<Vec<String>>,
    sender: UdpSocket,
    cache_ready: AtomicBool,
    invalidations: mpsc::Sender<String>,
}

impl fmt::Debug for ClusterCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("port", &self.port)
            .field("local_ip", &self.local_ip)
            .field("state", &self.state())
            .field("peers", &self.peers())
            .finish_non_exhaustive()
    }
}

impl ClusterCoordinator {
    /// Create a coordinator in `Bootstrapping` with an outbound socket ready.
    ///
    /// # Errors
    /// Returns an error if the outbound UDP socket cannot be created.
    pub async fn new(config: GossipConfig) -> std::io::Result<(Arc<Self>, InvalidationFeed)> {
        let local_ip = match config.local_ip {
            Some(ip) => ip,
            None => net::outbound_ip().await,
        };
        let sender = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        sender.set_broadcast(true)?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let coordinator = Arc::new(Self {
            port: config.port,
            broadcast: config.broadcast,
            local_ip,
            state: RwLock::new(ClusterState::Bootstrapping),
            peers: RwLock::new(Vec::new()),
            sender,
            cache_ready: AtomicBool::new(false),
            invalidations: tx,
        });
        info!(%local_ip, port = config.port, "cluster coordinator created");
        Ok((coordinator, rx))
    }

    #[must_use]
    pub fn state(&self) -> ClusterState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ClusterState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        debug!(?state, "cluster state changed");
    }

    #[must_use]
    pub const fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    /// Snapshot of the current peer set.
    #[must_use]
    pub fn peers(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn info(&self) -> ClusterInfo {
        ClusterInfo {
            state: self.state(),
            local_ip: self.local_ip.to_string(),
            gossip_port: self.port,
            peers: self.peers(),
        }
    }

    /// Whether the session cache has been filled at least once.
    #[must_use]
    pub fn is_cache_ready(&self) -> bool {
        self.cache_ready.load(Ordering::Acquire)
    }

    pub fn mark_cache_ready(&self) {
        self.cache_ready.store(true, Ordering::Release);
    }

    /// Whether outgoing gossip has anywhere to go: known peers or a broadcast
    /// address. Decides invalidation notices, independent of local cache state.
    #[must_use]
    pub fn has_audience(&self) -> bool {
        self.broadcast.is_some()
            || !self
                .peers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    /// Populate the peer set in the background, then announce this instance.
    ///
    /// The returned receiver resolves with the peer set once discovery is done;
    /// callers bound their wait with `Discovery::deadline`.
    pub fn discover_peers(self: &Arc<Self>, discovery: Discovery) -> oneshot::Receiver<Vec<String>> {
        let coordinator = Arc::clone(self);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            coordinator.set_state(ClusterState::Discovering);

            let candidates = discovery.candidates().await.unwrap_or_else(|err| {
                warn!(error = %err, "peer discovery failed");
                Vec::new()
            });
            let peers = filter_peers(&candidates, coordinator.local_ip);
            *coordinator
                .peers
                .write()
                .unwrap_or_else(PoisonError::into_inner) = peers.clone();

            if peers.is_empty() && coordinator.broadcast.is_none() {
                info!("no peers discovered, serving standalone");
            } else {
                info!(peers = ?peers, "peers discovered, announcing");
                coordinator.broadcast(&GossipMessage::Join).await;
                coordinator.set_state(ClusterState::Joined);
            }

            if done_tx.send(peers).is_err() {
                debug!("discovery finished after startup stopped waiting");
            }
        });

        done_rx
    }

    /// Bind the well-known gossip port on all interfaces.
    ///
    /// # Errors
    /// Returns an error if the port cannot be bound.
    pub async fn bind_listener(&self) -> std::io::Result<UdpSocket> {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port)).await
    }

    /// Receive and dispatch datagrams until `shutdown` flips to true or its
    /// sender goes away. Bad input and read errors never end the loop.
    pub async fn listen(self: Arc<Self>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
        let mut buf = [0_u8; MAX_DATAGRAM];
        info!(addr = ?socket.local_addr().ok(), "gossip listener started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                    Err(err) => {
                        warn!(error = %err, "gossip receive failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        info!("gossip listener stopped");
    }

    async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        let message = match GossipMessage::parse(datagram) {
            Ok(message) => message,
            Err(err) => {
                warn!(%from, len = datagram.len(), error = %err, "dropping gossip datagram");
                return;
            }
        };

        let peer = from.ip();
        if peer == self.local_ip {
            debug!(?message, "ignoring own gossip");
            return;
        }

        match message {
            GossipMessage::Join => {
                info!(%peer, "join request");
                self.send_to(SocketAddr::new(peer, self.port), &GossipMessage::JoinAck)
                    .await;
            }
            GossipMessage::JoinAck => info!(%peer, "join acknowledged"),
            GossipMessage::Invalidate { partition } => {
                info!(%peer, %partition, "invalidation notice");
                if let Err(err) = self.invalidations.try_send(partition) {
                    warn!(error = %err, "invalidation feed unavailable, notice dropped");
                }
            }
        }
    }

    /// Send to every peer, and to the broadcast address when configured.
    pub async fn broadcast(&self, message: &GossipMessage) {
        let mut targets: Vec<IpAddr> = self
            .peers()
            .iter()
            .filter_map(|peer| peer.parse().ok())
            .collect();
        if let Some(broadcast) = self.broadcast {
            targets.push(broadcast);
        }
        for ip in targets {
            self.send_to(SocketAddr::new(ip, self.port), message).await;
        }
    }

    /// Fire-and-forget send; failures are logged only.
    pub async fn send_to(&self, target: SocketAddr, message: &GossipMessage) {
        let payload = message.encode();
        match self.sender.send_to(payload.as_bytes(), target).await {
            Ok(_) => debug!(%target, %payload, "gossip sent"),
            Err(err) => warn!(%target, %payload, error = %err, "gossip send failed"),
        }
    }

    /// Tell every peer to reload `partition`.
    pub async fn invalidate(&self, partition: &str) {
        self.broadcast(&GossipMessage::invalidate(partition)).await;
    }
}
