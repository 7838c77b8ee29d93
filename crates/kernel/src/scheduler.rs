use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

/// Tick rate used when none (or a nonsensical one) is configured.
pub const DEFAULT_TICK_RATE: f64 = 20.0;
/// Longest wall-clock gap credited to a single wake.
pub const MAX_FRAME: Duration = Duration::from_millis(1000);
/// Most updates run in one wake before leftover time is dropped.
pub const MAX_CATCH_UP: u32 = 10;

const FALLBACK_STEP: Duration = Duration::from_millis(50);
const MIN_STEP: Duration = Duration::from_millis(1);

/// Outcome of one scheduler wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeReport {
    /// Updates run during this wake.
    pub updates: u32,
    /// Tick counter after the wake.
    pub tick: u64,
    /// Delay until the next wake, `None` when stopped.
    pub next_wake: Option<Duration>,
}

/// Fixed-step driver.
///
/// Wall-clock time is accumulated and spent in whole steps of
/// [`Scheduler::time_per_tick`]; every update sees exactly that step no
/// matter how irregularly the scheduler is woken. The owner supplies the
/// update function on each wake, which lets it lend out mutable state.
#[derive(Debug, Clone)]
pub struct Scheduler {
    time_per_tick: Duration,
    tick: u64,
    accumulator: Duration,
    last_wake: Option<Instant>,
    next_wake: Option<Instant>,
    running: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}

impl Scheduler {
    /// Create a stopped scheduler running at `tick_rate` ticks per second.
    pub fn new(tick_rate: f64) -> Self {
        Self {
            time_per_tick: step_for_rate(tick_rate),
            tick: 0,
            accumulator: Duration::ZERO,
            last_wake: None,
            next_wake: None,
            running: false,
        }
    }

    pub fn time_per_tick(&self) -> Duration {
        self.time_per_tick
    }

    /// Effective rate after clamping.
    pub fn tick_rate(&self) -> f64 {
        1000.0 / (self.time_per_tick.as_secs_f64() * 1000.0)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// When the next wake is due, if one is pending.
    pub fn next_wake(&self) -> Option<Instant> {
        self.next_wake
    }

    /// Start ticking from `now`. Starting a running scheduler does nothing.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        self.accumulator = Duration::ZERO;
        self.last_wake = Some(now);
        self.next_wake = Some(now);
        tracing::info!(
            step_ms = self.time_per_tick.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Stop ticking and cancel the pending wake. Safe to call at any time;
    /// state stays as of the last completed update.
    pub fn stop(&mut self) {
        if self.running {
            tracing::info!(tick = self.tick, "scheduler stopped");
        }
        self.running = false;
        self.next_wake = None;
    }

    /// Run the updates owed at `now`.
    ///
    /// The gap since the previous wake is clamped to [`MAX_FRAME`]; at most
    /// [`MAX_CATCH_UP`] updates run, after which any leftover time is
    /// discarded. An update returning an error or panicking is logged and
    /// the scheduler carries on with the next tick.
    pub fn wake<E, F>(&mut self, now: Instant, mut update: F) -> WakeReport
    where
        E: Display,
        F: FnMut(u64, Duration) -> Result<(), E>,
    {
        if !self.running {
            return WakeReport {
                updates: 0,
                tick: self.tick,
                next_wake: None,
            };
        }
        let _span = tracing::info_span!("scheduler_wake", tick = self.tick).entered();
        let started = Instant::now();

        let last = self.last_wake.unwrap_or(now);
        let elapsed = now.saturating_duration_since(last).min(MAX_FRAME);
        self.last_wake = Some(now);
        self.accumulator += elapsed;

        let step = self.time_per_tick;
        let mut updates = 0;
        while self.accumulator >= step {
            self.tick += 1;
            let tick = self.tick;
            match catch_unwind(AssertUnwindSafe(|| update(tick, step))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(tick, %err, "tick update failed"),
                Err(_) => tracing::error!(tick, "tick update panicked"),
            }
            self.accumulator -= step;
            updates += 1;
            if updates >= MAX_CATCH_UP {
                if !self.accumulator.is_zero() {
                    tracing::warn!(
                        tick,
                        dropped_ms = self.accumulator.as_millis() as u64,
                        "catch-up cap reached, dropping accumulated time"
                    );
                }
                self.accumulator = Duration::ZERO;
                break;
            }
        }

        let delay = step.saturating_sub(started.elapsed());
        self.next_wake = Some(now + delay);
        WakeReport {
            updates,
            tick: self.tick,
            next_wake: Some(delay),
        }
    }
}

/// Step length for a rate, with the safety floor and 20 Hz fallback.
fn step_for_rate(tick_rate: f64) -> Duration {
    let ms = 1000.0 / tick_rate;
    if !ms.is_finite() || ms <= 0.0 {
        tracing::warn!(tick_rate, "invalid tick rate, falling back to 20 Hz");
        return FALLBACK_STEP;
    }
    let step = Duration::from_secs_f64(ms / 1000.0);
    if step < MIN_STEP {
        tracing::warn!(tick_rate, "tick rate above 1000 Hz, falling back to 20 Hz");
        return FALLBACK_STEP;
    }
    step
}
