use crate::clock::{MonotonicClock, TimeSource};
use crate::constants::*;
use crate::window::TimestampWindow;
use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Invalid tier configuration, raised at construction only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GovernorError {
    #[error("at least one target frame rate is required")]
    NoTargetRates,
    #[error(
        "must specify as many minimum rates as target rates minus one \
        (got {minimums} for {targets} target rates)"
    )]
    TooFewMinimumRates { targets: usize, minimums: usize },
    #[error("target frame rate {rate} for tier {tier} must be finite and positive")]
    InvalidTargetRate { tier: usize, rate: f64 },
    #[error("frame history size must be at least 1")]
    EmptyHistory,
}

/// Hysteresis tuning, all of which may come from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct GovernorSettings {
    /// Number of frame-start timestamps averaged into one measurement.
    #[serde(rename = "history-size")]
    pub frame_history_size: usize,
    /// Consecutive good windows before locking the tier; 0 disables locking.
    pub max_good_frames: u32,
    /// Consecutive slow windows before demoting to the next tier.
    pub max_slow_frames: u32,
    pub allow_reducing: bool,
    pub allow_locking: bool,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            frame_history_size: DEFAULT_FRAME_HISTORY_SIZE,
            max_good_frames: DEFAULT_MAX_GOOD_FRAMES,
            max_slow_frames: DEFAULT_MAX_SLOW_FRAMES,
            allow_reducing: true,
            allow_locking: true,
        }
    }
}

/// Point-in-time view of the governor, suitable for display or export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameReport {
    pub total_frames: u64,
    /// `None` until the first full window has been measured.
    pub current_fps: Option<f64>,
    pub target_fps: f64,
    pub locked: bool,
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current_fps {
            Some(fps) => write!(f, "FPS: {fps:.1}")?,
            None => write!(f, "FPS: --")?,
        }
        write!(f, " target: {:.1}", self.target_fps)?;
        if self.locked {
            write!(f, " (locked)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Signals {
    reset_requested: AtomicBool,
    interrupted: Mutex<bool>,
    wake: Condvar,
}

/// Thread-safe side channel into a governor.
///
/// The render loop owns the governor itself; other threads hold a handle to
/// request a reset or to cut a pacing sleep short.
#[derive(Debug, Clone, Default)]
pub struct GovernorHandle {
    signals: Arc<Signals>,
}

impl GovernorHandle {
    /// Asks the governor to forget its history and retry the highest tier.
    ///
    /// Takes effect at the top of the next `frame_started`.
    pub fn request_reset(&self) {
        self.signals.reset_requested.store(true, Ordering::Release);
    }

    pub fn reset_pending(&self) -> bool {
        self.signals.reset_requested.load(Ordering::Acquire)
    }

    /// Wakes the current pacing sleep, or the next one if none is in progress.
    pub fn interrupt(&self) {
        let mut interrupted = self
            .signals
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *interrupted = true;
        self.signals.wake.notify_all();
    }

    /// Blocks for up to `duration`. Returns true if woken by `interrupt`.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self
            .signals
            .interrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut guard, _) = self
            .signals
            .wake
            .wait_timeout_while(guard, duration, |interrupted| !*interrupted)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, false)
    }

    fn take_reset(&self) -> bool {
        self.signals.reset_requested.swap(false, Ordering::AcqRel)
    }
}

/// Adaptive frame-pacing governor
///
/// Measures the achieved frame rate over a sliding window of frame-start
/// times, demotes to the next lower tier after a sustained shortfall, and
/// locks onto a tier once it has been held long enough.
///
/// `frame_started`, `nanos_to_wait_until_next_frame` and
/// `sleep_until_next_frame` must be called from one thread. Resets and
/// sleep interrupts go through a [`GovernorHandle`].
#[derive(Debug)]
pub struct FrameRateGovernor<C = MonotonicClock> {
    clock: C,
    target_rates: Vec<f64>,
    fudged_rates: Vec<f64>,
    // Truncated to target_rates.len() - 1: the last tier has no floor.
    minimum_rates: Vec<f64>,
    settings: GovernorSettings,
    window: TimestampWindow,
    tier_index: usize,
    nanos_per_frame: u64,
    current_fps: Option<f64>,
    good_frames: u32,
    slow_frames: u32,
    total_frames: u64,
    locked: bool,
    handle: GovernorHandle,
}

impl<C: TimeSource> FrameRateGovernor<C> {
    /// Creates a governor with default hysteresis settings.
    ///
    /// With targets `[60, 45, 30]` and minimums `[57, 43]`, the governor aims
    /// for 60 fps, falls to 45 if it cannot hold 57, then to 30 if it cannot
    /// hold 43, where it stays until reset. Extra minimums are ignored.
    pub fn new(
        clock: C,
        target_rates: &[f64],
        minimum_rates: &[f64],
    ) -> Result<Self, GovernorError> {
        Self::with_settings(clock, target_rates, minimum_rates, GovernorSettings::default())
    }

    /// A governor with a single tier, which never demotes.
    pub fn single_rate(clock: C, frame_rate: f64) -> Result<Self, GovernorError> {
        Self::new(clock, &[frame_rate], &[])
    }

    pub fn with_settings(
        clock: C,
        target_rates: &[f64],
        minimum_rates: &[f64],
        settings: GovernorSettings,
    ) -> Result<Self, GovernorError> {
        if target_rates.is_empty() {
            return Err(GovernorError::NoTargetRates);
        }
        let floors = target_rates.len() - 1;
        if minimum_rates.len() < floors {
            return Err(GovernorError::TooFewMinimumRates {
                targets: target_rates.len(),
                minimums: minimum_rates.len(),
            });
        }
        if let Some((tier, &rate)) = target_rates
            .iter()
            .enumerate()
            .find(|(_, rate)| !(rate.is_finite() && **rate > 0.0))
        {
            return Err(GovernorError::InvalidTargetRate { tier, rate });
        }
        if settings.frame_history_size == 0 {
            return Err(GovernorError::EmptyHistory);
        }

        let fudged_rates = target_rates
            .iter()
            .map(|rate| rate * TARGET_RATE_FUDGE_FACTOR)
            .collect();

        let mut governor = Self {
            clock,
            target_rates: target_rates.to_vec(),
            fudged_rates,
            minimum_rates: minimum_rates[..floors].to_vec(),
            settings,
            window: TimestampWindow::new(settings.frame_history_size),
            tier_index: 0,
            nanos_per_frame: 0,
            current_fps: None,
            good_frames: 0,
            slow_frames: 0,
            total_frames: 0,
            locked: false,
            handle: GovernorHandle::default(),
        };
        governor.set_tier(0);
        Ok(governor)
    }

    fn set_tier(&mut self, index: usize) {
        self.tier_index = index;
        self.nanos_per_frame = (NANOS_PER_SECOND as f64 / self.fudged_rates[index]) as u64;
    }

    fn demote(&mut self) {
        let from = self.target_frames_per_second();
        self.set_tier(self.tier_index + 1);
        self.good_frames = 0;
        self.slow_frames = 0;
        self.locked = false;
        info!(
            "reducing target frame rate {from:.1} -> {:.1} fps (measured {:.1} fps)",
            self.target_frames_per_second(),
            self.current_fps.unwrap_or_default()
        );
    }

    fn apply_reset(&mut self) {
        self.clear_timestamps();
        self.set_tier(0);
        self.locked = false;
        debug!(
            "frame rate reset, retrying {:.1} fps",
            self.target_frames_per_second()
        );
    }

    /// Records the start of a frame. Call once per frame, before producing it.
    pub fn frame_started(&mut self) {
        // Deferred so a reset never lands in the middle of a wait computation.
        if self.handle.take_reset() {
            self.apply_reset();
        }

        let now = self.clock.now_nanos();
        self.total_frames += 1;
        let Some(oldest) = self.window.push(now) else {
            return;
        };

        let seconds = now.saturating_sub(oldest) as f64 / NANOS_PER_SECOND as f64;
        let fps = self.window.capacity() as f64 / seconds;
        self.current_fps = Some(fps);

        if self.locked {
            return;
        }
        let Some(&minimum) = self.minimum_rates.get(self.tier_index) else {
            return;
        };

        if fps < minimum {
            self.slow_frames = self.slow_frames.saturating_add(1);
            if self.slow_frames >= self.settings.max_slow_frames {
                if self.settings.allow_reducing {
                    self.demote();
                } else if self.slow_frames == self.settings.max_slow_frames {
                    debug!(
                        "holding {:.1} fps below minimum {minimum:.1}, reducing disabled",
                        self.target_frames_per_second()
                    );
                }
            }
        } else {
            self.good_frames = self.good_frames.saturating_add(1);
            let max_good = self.settings.max_good_frames;
            if max_good > 0 && self.good_frames >= max_good {
                if self.settings.allow_locking {
                    self.locked = true;
                    info!(
                        "locking frame rate at {:.1} fps",
                        self.target_frames_per_second()
                    );
                }
                // Otherwise a stale slow count would survive an arbitrarily long good streak.
                self.good_frames = 0;
                self.slow_frames = 0;
            }
        }
    }

    /// Recommended nanoseconds to wait before starting the next frame.
    ///
    /// Catches up when the loop has fallen behind its own multi-frame
    /// schedule, never slows down when ahead, and never returns less than
    /// one millisecond.
    pub fn nanos_to_wait_until_next_frame(&self) -> u64 {
        let Some(last_start) = self.window.newest() else {
            return MIN_WAIT_NANOS;
        };
        let now = self.clock.now_nanos() as i64;
        let nanos_per_frame = self.nanos_per_frame as i64;

        let single_goal = last_start as i64 + nanos_per_frame;
        let mut wait = single_goal - now;
        if self.window.is_full() {
            if let Some(oldest) = self.window.oldest() {
                let multi_goal = oldest as i64 + self.window.capacity() as i64 * nanos_per_frame;
                let behind = single_goal - multi_goal;
                if behind > 0 {
                    wait -= behind;
                }
            }
        }

        wait.max(MIN_WAIT_NANOS as i64) as u64
    }

    /// Blocks until the next frame should start and returns the nanoseconds requested.
    ///
    /// An interrupt through the handle ends the sleep early; that is not an error.
    pub fn sleep_until_next_frame(&self) -> u64 {
        let nanos = self.nanos_to_wait_until_next_frame();
        self.handle.sleep(Duration::from_nanos(nanos));
        nanos
    }

    /// Same as [`GovernorHandle::request_reset`].
    pub fn reset_frame_rate(&self) {
        self.handle.request_reset();
    }

    /// Forgets measured timings without touching the tier or the lock.
    ///
    /// Call this when frames stop being produced for a while (pause, idle
    /// table) so the gap is not counted as a slow window.
    pub fn clear_timestamps(&mut self) {
        self.window.clear();
        self.good_frames = 0;
        self.slow_frames = 0;
        self.current_fps = None;
    }

    pub fn handle(&self) -> GovernorHandle {
        self.handle.clone()
    }

    pub fn current_frames_per_second(&self) -> Option<f64> {
        self.current_fps
    }

    /// Declared rate of the current tier, without the internal fudge factor.
    pub fn target_frames_per_second(&self) -> f64 {
        self.target_rates[self.tier_index]
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn tier_index(&self) -> usize {
        self.tier_index
    }

    pub fn tier_count(&self) -> usize {
        self.target_rates.len()
    }

    /// Internal frame period, derived from the fudged rate of the current tier.
    pub fn nanos_per_frame(&self) -> u64 {
        self.nanos_per_frame
    }

    pub fn good_frames(&self) -> u32 {
        self.good_frames
    }

    pub fn slow_frames(&self) -> u32 {
        self.slow_frames
    }

    pub fn last_frame_start(&self) -> Option<u64> {
        self.window.newest()
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    pub fn allow_reducing_frame_rate(&self) -> bool {
        self.settings.allow_reducing
    }

    pub fn set_allow_reducing_frame_rate(&mut self, value: bool) {
        self.settings.allow_reducing = value;
    }

    pub fn allow_locking_frame_rate(&self) -> bool {
        self.settings.allow_locking
    }

    pub fn set_allow_locking_frame_rate(&mut self, value: bool) {
        self.settings.allow_locking = value;
    }

    pub fn report(&self) -> FrameReport {
        FrameReport {
            total_frames: self.total_frames,
            current_fps: self.current_fps,
            target_fps: self.target_frames_per_second(),
            locked: self.locked,
        }
    }
}
