use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Lateness below this is scheduler jitter, not a replay falling behind.
pub const BEHIND_TOLERANCE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    OnTime,
    /// The deadline had already passed by this much; the tick runs immediately.
    Behind(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("replay interrupted by shutdown signal")]
pub struct Interrupted;

/// Maps simulated timestamps onto wall-clock deadlines.
///
/// A tick at simulated time `ts` is due `(ts - sim_start) / speed_multiplier`
/// after `wall_start`.
#[derive(Debug, Clone, Copy)]
pub struct SimulationClock {
    wall_start: Instant,
    sim_start: OffsetDateTime,
    speed_multiplier: f64,
}

impl SimulationClock {
    /// Starts the clock now. `speed_multiplier` must be finite and positive;
    /// the engine validates it before construction.
    pub fn start(sim_start: OffsetDateTime, speed_multiplier: f64) -> Self {
        Self::starting_at(Instant::now(), sim_start, speed_multiplier)
    }

    pub fn starting_at(wall_start: Instant, sim_start: OffsetDateTime, speed_multiplier: f64) -> Self {
        Self {
            wall_start,
            sim_start,
            speed_multiplier,
        }
    }

    pub fn sim_start(&self) -> OffsetDateTime {
        self.sim_start
    }

    /// Real time that should have elapsed since start when `ts` is processed.
    /// Timestamps before the simulated start map to zero.
    pub fn target_wall_elapsed(&self, ts: OffsetDateTime) -> Duration {
        let sim_elapsed = (ts - self.sim_start).as_seconds_f64().max(0.0);
        Duration::try_from_secs_f64(sim_elapsed / self.speed_multiplier).unwrap_or(Duration::MAX)
    }

    pub fn deadline(&self, ts: OffsetDateTime) -> Instant {
        let target = self.target_wall_elapsed(ts);
        self.wall_start
            .checked_add(target)
            .unwrap_or_else(|| self.wall_start + Duration::from_secs(u32::MAX as u64))
    }

    /// Sleeps until the deadline for `ts`, or returns at once when the replay
    /// is already past it. Returns `Interrupted` as soon as `shutdown` flips to
    /// `true`.
    pub async fn wait_until(
        &self,
        ts: OffsetDateTime,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Pacing, Interrupted> {
        if *shutdown.borrow() {
            return Err(Interrupted);
        }

        let deadline = self.deadline(ts);
        let now = Instant::now();
        if now >= deadline {
            let lag = now - deadline;
            return Ok(if lag > BEHIND_TOLERANCE {
                Pacing::Behind(lag)
            } else {
                Pacing::OnTime
            });
        }

        tokio::select! {
            _ = sleep_until(deadline) => Ok(Pacing::OnTime),
            _ = shutdown_requested(shutdown) => Err(Interrupted),
        }
    }
}

/// Resolves once the shutdown flag is `true`. A dropped sender means shutdown
/// can never be requested, so the future then stays pending.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
