// ============================
// crates/backend-lib/src/location.rs
// ============================
//! Vehicle-location fan-out.
//!
//! Producers (driver apps) push `update_location` frames; viewers receive
//! every position as it arrives. The latest position per vehicle lives in
//! memory only and is rebuilt from producer traffic after a restart.
//!
//! # Roles
//! A connection starts as a viewer (or unbound when `auto_subscribe` is off)
//! and becomes a producer with its first `update_location`. Producers stop
//! receiving the broadcast unless they `subscribe` explicitly.
//!
//! # Eviction
//! A vehicle disappears when its producer disconnects, or when the staleness
//! sweep finds no update for longer than `stale_after`. Both paths tell the
//! viewers with a `vehicle_removed` frame.
//!
//! # Locking
//! Peers, the producer index and the positions share one mutex so that
//! upsert-then-broadcast, join-then-snapshot and remove-then-broadcast are
//! each atomic. Sends only enqueue, so the lock is never held across I/O.

use crate::config::Settings;
use crate::connection::{Connection, ConnectionId};
use crate::liveness::{heartbeat, spawn_periodic, Beat, Sweep, SweepReport};
use crate::metrics::{LOCATION_EVICTED, LOCATION_UPDATE};
use crate::session::FrameHandler;
use axum::extract::ws::Utf8Bytes;
use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use ridelink_common::{
    FrameError, InboundFrame, LocationFrame, LocationUpdate, VehicleId, VehiclePosition,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What a location connection is doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRole {
    /// Connected, receives nothing until it subscribes
    Unbound,
    /// Receives every broadcast
    Viewer,
    /// Reports positions for `vehicle_id`
    Producer {
        vehicle_id: VehicleId,
        /// Also receives broadcasts
        subscribed: bool,
    },
}

impl PeerRole {
    fn receives_broadcasts(&self) -> bool {
        matches!(
            self,
            PeerRole::Viewer
                | PeerRole::Producer {
                    subscribed: true,
                    ..
                }
        )
    }
}

struct Peer {
    conn: Connection,
    role: PeerRole,
}

struct TrackedPosition {
    position: VehiclePosition,
    last_update: Instant,
}

#[derive(Default)]
struct LocationState {
    peers: HashMap<ConnectionId, Peer>,
    /// vehicle -> connection currently producing it
    producers: HashMap<VehicleId, ConnectionId>,
    positions: HashMap<VehicleId, TrackedPosition>,
}

impl LocationState {
    /// Send `frame` to every open viewer. Failures are logged, never removed
    /// here: that is the disconnect path's and the liveness sweep's job.
    fn broadcast(&self, frame: &LocationFrame) -> usize {
        let payload: Utf8Bytes = match serde_json::to_string(frame) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize location frame");
                return 0;
            },
        };

        let mut sent = 0;
        for peer in self.peers.values() {
            if !peer.role.receives_broadcasts() || !peer.conn.is_open() {
                continue;
            }
            match peer.conn.send_text(payload.clone()) {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %peer.conn.id(), error = %e, "Broadcast send failed");
                },
            }
        }
        sent
    }

    /// Replay every known position to one connection.
    fn send_snapshot(&self, conn: &Connection) {
        for tracked in self.positions.values() {
            let frame = LocationFrame::VehiclePosition {
                data: tracked.position.clone(),
            };
            if let Err(e) = conn.send_json(&frame) {
                tracing::warn!(connection_id = %conn.id(), error = %e, "Snapshot send failed");
                return;
            }
        }
    }

    /// Drop a vehicle and tell the viewers. Returns false if it was unknown.
    fn evict(&mut self, vehicle_id: &str) -> bool {
        self.producers.remove(vehicle_id);
        if self.positions.remove(vehicle_id).is_none() {
            return false;
        }
        self.broadcast(&LocationFrame::removed(vehicle_id));
        true
    }
}

/// Vehicle-location socket server
pub struct LocationServer {
    state: Mutex<LocationState>,
    stale_after: Duration,
    auto_subscribe: bool,
}

impl LocationServer {
    pub fn new(settings: &Settings) -> Self {
        Self::with_options(settings.stale_after(), settings.location.auto_subscribe)
    }

    pub fn with_options(stale_after: Duration, auto_subscribe: bool) -> Self {
        Self {
            state: Mutex::new(LocationState::default()),
            stale_after,
            auto_subscribe,
        }
    }

    /// Start tracking `conn` and replay the current positions to it.
    pub fn connect(&self, conn: Connection) {
        conn.liveness().mark_alive();
        let role = if self.auto_subscribe {
            PeerRole::Viewer
        } else {
            PeerRole::Unbound
        };

        let mut state = self.state.lock();
        state.send_snapshot(&conn);
        tracing::info!(
            connection_id = %conn.id(),
            vehicles = state.positions.len(),
            "Location client connected"
        );
        state.peers.insert(conn.id(), Peer { conn, role });
    }

    /// Handle one inbound text frame from connection `id`.
    pub fn handle_text(&self, id: ConnectionId, text: &str) {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::UpdateLocation(update)) => self.update_location(id, update),
            Ok(InboundFrame::Subscribe) => self.subscribe(id),
            Ok(InboundFrame::Unknown(event)) => {
                tracing::debug!(connection_id = %id, event = ?event, "Ignoring unknown location event");
            },
            Err(err) => self.reject(id, &err),
        }
    }

    fn reject(&self, id: ConnectionId, err: &FrameError) {
        tracing::debug!(connection_id = %id, error = ?err, "Rejected location frame");
        let state = self.state.lock();
        if let Some(peer) = state.peers.get(&id) {
            if let Err(e) = peer.conn.send_json(&LocationFrame::error(err)) {
                tracing::warn!(connection_id = %id, error = %e, "Failed to send error frame");
            }
        }
    }

    /// Record a position report from connection `id`, fan it out and ack it.
    ///
    /// Last write wins: the producer's `timestamp` is not compared with the
    /// stored one. A different connection reporting the same vehicle takes
    /// it over.
    pub fn update_location(&self, id: ConnectionId, update: LocationUpdate) {
        let position = update.into_position(Utc::now().timestamp_millis());
        let vehicle_id = position.vehicle_id.clone();

        let mut state = self.state.lock();
        let LocationState {
            peers,
            producers,
            positions,
        } = &mut *state;
        let Some(peer) = peers.get_mut(&id) else {
            return;
        };

        let subscribed = match &peer.role {
            PeerRole::Producer {
                vehicle_id: previous,
                subscribed,
            } => {
                if *previous != vehicle_id && producers.get(previous) == Some(&id) {
                    // The old vehicle keeps its position until it goes stale.
                    producers.remove(previous);
                }
                *subscribed
            },
            PeerRole::Unbound | PeerRole::Viewer => false,
        };
        peer.role = PeerRole::Producer {
            vehicle_id: vehicle_id.clone(),
            subscribed,
        };
        let producer = peer.conn.clone();

        if let Some(displaced) = producers.insert(vehicle_id.clone(), id) {
            if displaced != id {
                tracing::info!(
                    vehicle_id = %vehicle_id,
                    connection_id = %id,
                    displaced = %displaced,
                    "Producer took over vehicle"
                );
            }
        }
        positions.insert(
            vehicle_id.clone(),
            TrackedPosition {
                position: position.clone(),
                last_update: Instant::now(),
            },
        );

        let timestamp = position.timestamp;
        let viewers = state.broadcast(&LocationFrame::VehiclePosition { data: position });
        counter!(LOCATION_UPDATE).increment(1);
        tracing::trace!(vehicle_id = %vehicle_id, viewers, "Position broadcast");

        if let Err(e) = producer.send_json(&LocationFrame::LocationAck {
            vehicle_id,
            timestamp,
        }) {
            tracing::warn!(connection_id = %id, error = %e, "Failed to ack location");
        }
    }

    /// Add connection `id` to the viewers and replay the snapshot to it.
    pub fn subscribe(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        let Some(peer) = state.peers.get_mut(&id) else {
            return;
        };
        peer.role = match std::mem::replace(&mut peer.role, PeerRole::Unbound) {
            PeerRole::Producer { vehicle_id, .. } => PeerRole::Producer {
                vehicle_id,
                subscribed: true,
            },
            PeerRole::Unbound | PeerRole::Viewer => PeerRole::Viewer,
        };
        let conn = peer.conn.clone();
        state.send_snapshot(&conn);
        tracing::debug!(connection_id = %id, "Location client subscribed");
    }

    /// Forget connection `id`. If it still produced a vehicle, that vehicle
    /// is removed and viewers are told. Safe to call more than once.
    pub fn disconnect(&self, id: ConnectionId) -> Option<VehicleId> {
        let mut state = self.state.lock();
        let peer = state.peers.remove(&id)?;
        tracing::info!(connection_id = %id, "Location client disconnected");

        let PeerRole::Producer { vehicle_id, .. } = peer.role else {
            return None;
        };
        if state.producers.get(&vehicle_id) != Some(&id) {
            return None;
        }
        state.evict(&vehicle_id);
        tracing::info!(vehicle_id = %vehicle_id, "Vehicle removed after producer disconnect");
        Some(vehicle_id)
    }

    /// Evict every vehicle without an update for longer than `stale_after`.
    pub fn sweep_stale(&self) -> Vec<VehicleId> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let stale: Vec<VehicleId> = state
            .positions
            .iter()
            .filter(|(_, tracked)| now.duration_since(tracked.last_update) > self.stale_after)
            .map(|(vehicle_id, _)| vehicle_id.clone())
            .collect();

        for vehicle_id in &stale {
            state.evict(vehicle_id);
            tracing::info!(vehicle_id = %vehicle_id, "Stale vehicle evicted");
        }
        counter!(LOCATION_EVICTED).increment(stale.len() as u64);
        stale
    }

    /// Run [`LocationServer::sweep_stale`] every `period` until the server is dropped.
    pub fn spawn_stale_sweeper(server: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        spawn_periodic(server, period, |server| {
            let evicted = server.sweep_stale();
            if !evicted.is_empty() {
                tracing::debug!(evicted = evicted.len(), "Staleness sweep");
            }
            async {}
        })
    }

    /// Current positions, ordered by vehicle id
    pub fn snapshot(&self) -> Vec<VehiclePosition> {
        let state = self.state.lock();
        let mut positions: Vec<VehiclePosition> = state
            .positions
            .values()
            .map(|tracked| tracked.position.clone())
            .collect();
        positions.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        positions
    }

    pub fn position(&self, vehicle_id: &str) -> Option<VehiclePosition> {
        let state = self.state.lock();
        state
            .positions
            .get(vehicle_id)
            .map(|tracked| tracked.position.clone())
    }

    pub fn producer_of(&self, vehicle_id: &str) -> Option<ConnectionId> {
        self.state.lock().producers.get(vehicle_id).copied()
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<PeerRole> {
        self.state.lock().peers.get(&id).map(|peer| peer.role.clone())
    }

    pub fn vehicle_count(&self) -> usize {
        self.state.lock().positions.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.state
            .lock()
            .peers
            .values()
            .filter(|peer| peer.role.receives_broadcasts())
            .count()
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }
}

impl Sweep for LocationServer {
    fn name(&self) -> &'static str {
        "vehicle-location"
    }

    fn sweep_liveness(&self) -> SweepReport {
        let connections: Vec<Connection> = self
            .state
            .lock()
            .peers
            .values()
            .map(|peer| peer.conn.clone())
            .collect();

        let mut report = SweepReport::default();
        for conn in connections {
            let beat = heartbeat(&conn);
            if beat == Beat::Dead {
                self.disconnect(conn.id());
            }
            report.record(beat);
        }
        report
    }
}

/// Frame handler for one location socket
pub struct LocationSession {
    server: Arc<LocationServer>,
}

impl LocationSession {
    pub fn new(server: Arc<LocationServer>) -> Self {
        Self { server }
    }
}

impl FrameHandler for LocationSession {
    fn on_text(&self, conn: &Connection, text: &str) {
        self.server.handle_text(conn.id(), text);
    }

    fn on_close(&self, conn: &Connection) {
        self.server.disconnect(conn.id());
    }
}
