//! Ping/pong liveness detection.
//!
//! Every sweep clears each connection's alive flag and pings it; the pong
//! handler sets the flag again. A connection whose flag is still clear at the
//! next sweep missed a whole interval and is terminated.

use crate::connection::Connection;
use crate::metrics::LIVENESS_REAPED;
use metrics::counter;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Alive flag of one connection
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
}

/// Outcome of checking one connection during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Answered since the last sweep; flag cleared, ping due
    PingDue,
    /// Missed a whole interval
    Dead,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Clear the flag, reporting whether it was set.
    pub fn check(&self) -> Beat {
        if self.alive.swap(false, Ordering::AcqRel) {
            Beat::PingDue
        } else {
            Beat::Dead
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one heartbeat step on `conn`: ping it, or terminate it if it is dead.
///
/// The caller still has to drop a dead connection from its own indexes.
pub fn heartbeat(conn: &Connection) -> Beat {
    match conn.liveness().check() {
        Beat::PingDue => {
            if let Err(e) = conn.ping() {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Ping not queued");
            }
            Beat::PingDue
        },
        Beat::Dead => {
            tracing::info!(connection_id = %conn.id(), "Heartbeat missed, terminating connection");
            counter!(LIVENESS_REAPED).increment(1);
            conn.terminate();
            Beat::Dead
        },
    }
}

/// Counts from one liveness sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub reaped: usize,
}

impl SweepReport {
    pub fn record(&mut self, beat: Beat) {
        match beat {
            Beat::PingDue => self.pinged += 1,
            Beat::Dead => self.reaped += 1,
        }
    }
}

/// Something that owns connections and can sweep them
pub trait Sweep: Send + Sync + 'static {
    /// Label used in logs
    fn name(&self) -> &'static str;

    /// Check every tracked connection once.
    fn sweep_liveness(&self) -> SweepReport;
}

/// Sweep `target` every `period` until it is dropped.
pub fn spawn_liveness_monitor<T: Sweep>(target: &Arc<T>, period: Duration) -> JoinHandle<()> {
    let name = target.name();
    spawn_periodic(target, period, move |target| {
        let report = target.sweep_liveness();
        tracing::debug!(
            server = name,
            pinged = report.pinged,
            reaped = report.reaped,
            "Liveness sweep"
        );
        async {}
    })
}

/// Call `tick` every `period`, skipping the immediate first tick. The task
/// holds only a weak reference and stops once `target` is dropped.
pub fn spawn_periodic<T, F, Fut>(target: &Arc<T>, period: Duration, mut tick: F) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: FnMut(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let weak: Weak<T> = Arc::downgrade(target);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(target) = weak.upgrade() else {
                break;
            };
            tick(target).await;
        }
    })
}
