use std::time::Duration;

/// Host time as last reported by the render callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackClock {
    now: Duration,
}

impl PlaybackClock {
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Moves the clock forward. Timestamps from the past are ignored so a
    /// jittery host can never make timers fire twice.
    pub fn advance_to(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }
}

/// Cooperative repeating task that paces analysis ticks.
///
/// The loop has no thread of its own: the host's render callback polls it and
/// it answers whether a tick is due. Stopping it drops the pending tick.
#[derive(Debug, Clone)]
pub struct AnalysisLoop {
    interval: Duration,
    next_due: Option<Duration>,
    ticks: u64,
}

impl AnalysisLoop {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
            ticks: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// Number of ticks fired since the loop was created.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Schedules the first tick for `now`. Starting a running loop keeps its
    /// current schedule.
    pub fn start(&mut self, now: Duration) {
        if self.next_due.is_none() {
            self.next_due = Some(now);
        }
    }

    /// Cancels the pending tick.
    pub fn stop(&mut self) {
        self.next_due = None;
    }

    /// Returns `true` when a tick is due at `now` and schedules the next one.
    /// A quarter interval of jitter is tolerated. A host that falls behind
    /// skips the missed ticks instead of bursting.
    pub fn poll(&mut self, now: Duration) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now + self.interval / 4 < due {
            return false;
        }
        let mut next = due + self.interval;
        if next <= now {
            next = now + self.interval;
        }
        self.next_due = Some(next);
        self.ticks += 1;
        true
    }
}
