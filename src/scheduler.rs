// Cooperative timers for re-layout throttling, auto-save and the duplicate
// sweep. Time is always passed in; nothing here sleeps or spawns.

use crate::config::ScheduleConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    Relayout,
    AutoSave,
    DuplicateSweep,
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    period: Duration,
    next: Instant,
}

impl Interval {
    fn start(period_ms: u64, now: Instant) -> Option<Self> {
        (period_ms > 0).then(|| {
            let period = Duration::from_millis(period_ms);
            Self {
                period,
                next: now + period,
            }
        })
    }

    /// Fires at most once per poll; missed periods are not replayed.
    fn fire(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = now + self.period;
        true
    }
}

#[derive(Debug)]
pub struct Scheduler {
    delay: Duration,
    burst_window: Duration,
    pending: Option<Instant>,
    last_run: Option<Instant>,
    in_flight: bool,
    auto_save: Option<Interval>,
    duplicate_sweep: Option<Interval>,
    superseded: usize,
    destroyed: bool,
}

impl Scheduler {
    pub fn new(config: &ScheduleConfig, now: Instant) -> Self {
        Self {
            delay: Duration::from_millis(config.relayout_delay_ms),
            burst_window: Duration::from_millis(config.burst_window_ms),
            pending: None,
            last_run: None,
            in_flight: false,
            auto_save: Interval::start(config.auto_save_interval_ms, now),
            duplicate_sweep: Interval::start(config.duplicate_sweep_interval_ms, now),
            superseded: 0,
            destroyed: false,
        }
    }

    /// Schedule a re-layout, replacing any pending one. The delay doubles
    /// when a pass ran within the burst window.
    pub fn schedule(&mut self, now: Instant) -> Option<Instant> {
        if self.destroyed {
            return None;
        }
        let recent = self
            .last_run
            .is_some_and(|last| now.saturating_duration_since(last) < self.burst_window);
        let delay = if recent { self.delay * 2 } else { self.delay };
        if self.pending.is_some() {
            self.superseded += 1;
        }
        let deadline = now + delay;
        self.pending = Some(deadline);
        Some(deadline)
    }

    pub fn pending(&self) -> Option<Instant> {
        self.pending
    }

    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    /// Number of pending re-layouts replaced by a newer one.
    pub fn superseded(&self) -> usize {
        self.superseded
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Claim the pass slot. Returns false while another pass runs.
    pub fn begin_pass(&mut self) -> bool {
        if self.in_flight || self.destroyed {
            return false;
        }
        self.in_flight = true;
        self.pending = None;
        true
    }

    pub fn end_pass(&mut self, now: Instant) {
        self.in_flight = false;
        self.last_run = Some(now);
    }

    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }

    /// Everything due at `now`, re-layout first.
    pub fn poll(&mut self, now: Instant) -> Vec<Due> {
        let mut due = Vec::new();
        if self.destroyed {
            return due;
        }
        if self.pending.is_some_and(|deadline| now >= deadline) {
            due.push(Due::Relayout);
        }
        if self.auto_save.as_mut().is_some_and(|timer| timer.fire(now)) {
            due.push(Due::AutoSave);
        }
        if self
            .duplicate_sweep
            .as_mut()
            .is_some_and(|timer| timer.fire(now))
        {
            due.push(Due::DuplicateSweep);
        }
        due
    }

    /// Drop every timer. A destroyed scheduler never reports work again.
    pub fn destroy(&mut self) {
        self.pending = None;
        self.auto_save = None;
        self.duplicate_sweep = None;
        self.in_flight = false;
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
