//! Rate limiting for streamed message updates.
//!
//! A single visible pane is refreshed at 12 Hz. With several panes streaming
//! at once the interval grows with the square root of the pane count, so the
//! total refresh budget grows sub-linearly instead of staying flat per pane.

use std::time::{Duration, Instant};

/// Refresh rate for one visible pane.
pub const BASE_UPDATES_PER_SECOND: f64 = 12.0;

/// Decides whether an incoming update should reach its downstream effect.
///
/// Single-threaded by construction: one gate belongs to one logical stream
/// and is driven sequentially.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ThrottleGate {
    /// `parallel_units` is the number of panes sharing the display; 0 turns
    /// throttling off entirely (background streams).
    pub fn new(parallel_units: u32) -> Self {
        Self {
            interval: interval_for_units(parallel_units),
            last_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records an emission at `now` when the gate is open and reports whether
    /// it did.
    pub fn should_emit_at(&mut self, now: Instant) -> bool {
        let open = match self.last_emit {
            _ if self.interval.is_zero() => true,
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if open {
            self.last_emit = Some(now);
        }
        open
    }

    /// Runs `effect` if the gate is open right now.
    pub fn handle_update<F: FnOnce()>(&mut self, effect: F) -> bool {
        self.handle_update_at(Instant::now(), effect)
    }

    pub fn handle_update_at<F: FnOnce()>(&mut self, now: Instant, effect: F) -> bool {
        let emit = self.should_emit_at(now);
        if emit {
            effect();
        }
        emit
    }

    /// Runs `effect` unconditionally, so the final state is always observed.
    pub fn finalize<F: FnOnce()>(self, effect: F) {
        effect();
    }
}

fn interval_for_units(units: u32) -> Duration {
    let base_ms = 1000.0 / BASE_UPDATES_PER_SECOND;
    match units {
        0 => Duration::ZERO,
        1 => Duration::from_secs_f64(base_ms / 1000.0),
        n => Duration::from_millis((base_ms * f64::from(n).sqrt()).round() as u64),
    }
}
