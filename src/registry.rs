//! Who is online.
//!
//! The [`Registry`] maps mountpoint names to the base station that publishes to
//! them, and rover connections to the mountpoint they're subscribed to.
//!
//! Sessions are registered by the connection handlers and represented by
//! [`BaseHandle`] and [`RoverHandle`]. Dropping a handle removes the session,
//! so however a connection ends, it is always cleaned up.

use std::{
    collections::{
        BTreeMap,
        BTreeSet,
        HashMap,
        VecDeque,
    },
    fmt::Display,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::{
        Duration,
        Instant,
    },
};

use bytes::Bytes;
use chrono::{
    DateTime,
    Utc,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    geo::{
        DeclaredPosition,
        Geodetic,
        ObservedPosition,
    },
    rtcm::MessageType,
};

/// Identifies a TCP connection for as long as the registry lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("mountpoint not available: {mountpoint}")]
pub struct MountpointNotAvailable {
    pub mountpoint: String,
}

/// Shared registry of active sessions.
///
/// This is cheap to clone. All clones refer to the same sessions.
#[derive(Clone, Debug)]
pub struct Registry {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    next_connection_id: AtomicU64,
    subscriber_queue_size: usize,
    rate_window: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    bases: HashMap<String, BaseSession>,
    rovers: HashMap<ConnectionId, RoverSession>,
}

#[derive(Debug)]
pub(crate) struct BaseSession {
    pub connection_id: ConnectionId,
    pub mountpoint: String,
    pub address: SocketAddr,
    pub bytes_in: u64,
    pub start_time: DateTime<Utc>,
    pub started: Instant,
    pub subscribers: BTreeSet<ConnectionId>,

    /// Number of frames seen per message type
    pub messages: BTreeMap<MessageType, u64>,

    pub declared_position: Option<DeclaredPosition>,
    pub observed_position: Option<ObservedPosition>,

    /// Cancelled when this session is removed from the registry.
    closed: CancellationToken,
}

#[derive(Debug)]
pub(crate) struct RoverSession {
    pub connection_id: ConnectionId,
    pub username: String,
    pub address: SocketAddr,
    pub mountpoint: String,
    pub bytes_received: u64,
    pub timeline: ByteTimeline,
    pub connected_at: DateTime<Utc>,
    pub position: Option<Geodetic>,
    pub sender: mpsc::Sender<Bytes>,
}

impl Registry {
    pub fn new(subscriber_queue_size: usize, rate_window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Default::default(),
                next_connection_id: AtomicU64::new(1),
                subscriber_queue_size: subscriber_queue_size.max(1),
                rate_window,
            }),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.shared.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a base station for a mountpoint.
    ///
    /// If another base station is already publishing to this mountpoint, it is
    /// replaced: its rovers are disconnected and its [`BaseHandle::closed`]
    /// token is cancelled.
    pub fn register_base(
        &self,
        connection_id: ConnectionId,
        mountpoint: &str,
        address: SocketAddr,
        declared_position: Option<DeclaredPosition>,
    ) -> BaseHandle {
        let closed = CancellationToken::new();

        let session = BaseSession {
            connection_id,
            mountpoint: mountpoint.to_owned(),
            address,
            bytes_in: 0,
            start_time: Utc::now(),
            started: Instant::now(),
            subscribers: BTreeSet::new(),
            messages: BTreeMap::new(),
            declared_position,
            observed_position: None,
            closed: closed.clone(),
        };

        let mut state = self.shared.state.lock();
        if let Some(previous) = state.bases.remove(mountpoint) {
            tracing::warn!(
                %mountpoint,
                previous = %previous.address,
                new = %address,
                "replacing base station"
            );
            state.close_base(previous);
        }
        state.bases.insert(mountpoint.to_owned(), session);
        drop(state);

        BaseHandle {
            registry: self.clone(),
            connection_id,
            mountpoint: mountpoint.to_owned(),
            closed,
        }
    }

    /// Subscribes a rover to a mountpoint.
    ///
    /// Fails if no base station is publishing to the mountpoint.
    pub fn register_rover(
        &self,
        connection_id: ConnectionId,
        mountpoint: &str,
        username: &str,
        address: SocketAddr,
    ) -> Result<RoverHandle, MountpointNotAvailable> {
        let (sender, receiver) = mpsc::channel(self.shared.subscriber_queue_size);

        let mut state = self.shared.state.lock();
        let Some(base) = state.bases.get_mut(mountpoint)
        else {
            return Err(MountpointNotAvailable {
                mountpoint: mountpoint.to_owned(),
            });
        };
        base.subscribers.insert(connection_id);
        state.rovers.insert(
            connection_id,
            RoverSession {
                connection_id,
                username: username.to_owned(),
                address,
                mountpoint: mountpoint.to_owned(),
                bytes_received: 0,
                timeline: ByteTimeline::new(self.shared.rate_window),
                connected_at: Utc::now(),
                position: None,
                sender,
            },
        );
        drop(state);

        Ok(RoverHandle {
            registry: self.clone(),
            connection_id,
            receiver,
        })
    }

    /// Whether a base station is publishing to this mountpoint.
    pub fn has_base(&self, mountpoint: &str) -> bool {
        self.shared.state.lock().bases.contains_key(mountpoint)
    }

    /// Status of a single mountpoint.
    pub fn base(&self, mountpoint: &str) -> Option<MountpointStatus> {
        let state = self.shared.state.lock();
        let base = state.bases.get(mountpoint)?;
        Some(state.mountpoint_status(base, Instant::now()))
    }

    pub fn rover(&self, connection_id: ConnectionId) -> Option<RoverStatus> {
        self.shared
            .state
            .lock()
            .rovers
            .get(&connection_id)
            .map(|rover| rover.status(Instant::now()))
    }

    /// Removes the base station publishing to `mountpoint`, disconnecting it
    /// and all its rovers.
    pub fn disconnect_base(&self, mountpoint: &str) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(base) = state.bases.remove(mountpoint) {
            state.close_base(base);
            true
        }
        else {
            false
        }
    }

    /// Consistent view of all sessions.
    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let state = self.shared.state.lock();

        let mut mountpoints = state
            .bases
            .values()
            .map(|base| state.mountpoint_status(base, now))
            .collect::<Vec<_>>();
        mountpoints.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));

        Snapshot {
            total_bases: state.bases.len(),
            total_rovers: state.rovers.len(),
            mountpoints,
        }
    }

    /// Runs `f` on the session of this base station, if it's still
    /// registered.
    pub(crate) fn with_base<R>(
        &self,
        handle: &BaseHandle,
        f: impl FnOnce(&mut BaseSession, &mut HashMap<ConnectionId, RoverSession>) -> R,
    ) -> Option<R> {
        let mut state = self.shared.state.lock();
        let State { bases, rovers } = &mut *state;
        let base = bases
            .get_mut(&handle.mountpoint)
            .filter(|base| base.connection_id == handle.connection_id)?;
        Some(f(base, rovers))
    }

    fn remove_base(&self, mountpoint: &str, connection_id: ConnectionId) {
        let mut state = self.shared.state.lock();
        // the session might have been replaced in the meantime.
        if state
            .bases
            .get(mountpoint)
            .is_some_and(|base| base.connection_id == connection_id)
        {
            if let Some(base) = state.bases.remove(mountpoint) {
                state.close_base(base);
            }
        }
    }

    fn remove_rover(&self, connection_id: ConnectionId) {
        let mut state = self.shared.state.lock();
        if let Some(rover) = state.rovers.remove(&connection_id) {
            if let Some(base) = state.bases.get_mut(&rover.mountpoint) {
                base.subscribers.remove(&connection_id);
            }
        }
    }
}

impl State {
    fn close_base(&mut self, base: BaseSession) {
        // dropping the rovers' senders closes their connections.
        for connection_id in &base.subscribers {
            self.rovers.remove(connection_id);
        }
        base.closed.cancel();
        tracing::debug!(
            mountpoint = %base.mountpoint,
            rovers = base.subscribers.len(),
            "base session closed"
        );
    }

    fn mountpoint_status(&self, base: &BaseSession, now: Instant) -> MountpointStatus {
        MountpointStatus {
            mountpoint: base.mountpoint.clone(),
            base_address: base.address,
            connected_at: base.start_time,
            uptime: now.saturating_duration_since(base.started).as_secs(),
            bytes_in: base.bytes_in,
            declared_position: base.declared_position,
            observed_position: base.observed_position,
            message_types: base.messages.keys().copied().collect(),
            messages: base
                .messages
                .keys()
                .map(|message_type| message_type.to_string())
                .collect(),
            rovers: base
                .subscribers
                .iter()
                .filter_map(|connection_id| self.rovers.get(connection_id))
                .map(|rover| rover.status(now))
                .collect(),
        }
    }
}

impl RoverSession {
    fn status(&self, now: Instant) -> RoverStatus {
        RoverStatus {
            connection_id: self.connection_id,
            username: self.username.clone(),
            address: self.address,
            mountpoint: self.mountpoint.clone(),
            connected_at: self.connected_at,
            bytes_received: self.bytes_received,
            data_rate: self.timeline.rate(now),
            position: self.position,
        }
    }
}

/// Registration of a base station.
///
/// The session is removed when this is dropped.
#[derive(Debug)]
pub struct BaseHandle {
    registry: Registry,
    connection_id: ConnectionId,
    mountpoint: String,
    closed: CancellationToken,
}

impl BaseHandle {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Cancelled when the session was removed, e.g. because another base
    /// station took over the mountpoint.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

impl Drop for BaseHandle {
    fn drop(&mut self) {
        self.registry
            .remove_base(&self.mountpoint, self.connection_id);
    }
}

/// Subscription of a rover.
///
/// Receives the chunks published to the mountpoint. The channel is closed when
/// the base station goes away.
#[derive(Debug)]
pub struct RoverHandle {
    registry: Registry,
    connection_id: ConnectionId,
    receiver: mpsc::Receiver<Bytes>,
}

impl RoverHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for RoverHandle {
    fn drop(&mut self) {
        self.registry.remove_rover(self.connection_id);
    }
}

/// Bytes delivered to a rover over the last few seconds.
#[derive(Debug)]
pub(crate) struct ByteTimeline {
    samples: VecDeque<(Instant, usize)>,
    window: Duration,
}

impl ByteTimeline {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    pub fn record(&mut self, now: Instant, num_bytes: usize) {
        self.samples.push_back((now, num_bytes));
        while let Some((time, _)) = self.samples.front() {
            if now.saturating_duration_since(*time) > self.window {
                self.samples.pop_front();
            }
            else {
                break;
            }
        }
    }

    /// Data rate in bytes per second.
    pub fn rate(&self, now: Instant) -> f64 {
        let window = self.window.as_secs_f64();
        if window <= 0.0 {
            return 0.0;
        }

        let num_bytes: usize = self
            .samples
            .iter()
            .filter(|(time, _)| now.saturating_duration_since(*time) <= self.window)
            .map(|(_, num_bytes)| num_bytes)
            .sum();

        num_bytes as f64 / window
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub total_bases: usize,
    pub total_rovers: usize,
    pub mountpoints: Vec<MountpointStatus>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MountpointStatus {
    pub mountpoint: String,
    pub base_address: SocketAddr,
    pub connected_at: DateTime<Utc>,

    /// Seconds since the base station connected.
    pub uptime: u64,

    pub bytes_in: u64,
    pub declared_position: Option<DeclaredPosition>,
    pub observed_position: Option<ObservedPosition>,
    pub message_types: Vec<MessageType>,

    /// Classified message types, e.g. `1077 Multi-Service Messages (GPS
    /// MSM7)`
    pub messages: Vec<String>,

    pub rovers: Vec<RoverStatus>,
}

impl MountpointStatus {
    /// Average bit rate since the base station connected.
    pub fn bitrate(&self) -> u64 {
        self.bytes_in * 8 / self.uptime.max(1)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RoverStatus {
    pub connection_id: ConnectionId,
    pub username: String,
    pub address: SocketAddr,
    pub mountpoint: String,
    pub connected_at: DateTime<Utc>,
    pub bytes_received: u64,

    /// Bytes per second
    pub data_rate: f64,

    pub position: Option<Geodetic>,
}
