// Public modules
pub mod clock;
pub mod config;
pub mod driver;
pub mod governor;
pub mod logging;
pub mod window;

// Re-export constants commonly used
pub mod constants {
    /// Internal scheduling target = declared rate * this factor.
    pub const TARGET_RATE_FUDGE_FACTOR: f64 = 1.015;

    pub const NANOS_PER_SECOND: u64 = 1_000_000_000;
    pub const NANOS_PER_MILLI: u64 = 1_000_000;
    /// Never recommend waiting less than this.
    pub const MIN_WAIT_NANOS: u64 = NANOS_PER_MILLI;

    pub const DEFAULT_FRAME_HISTORY_SIZE: usize = 10;
    pub const DEFAULT_MAX_GOOD_FRAMES: u32 = 500;
    pub const DEFAULT_MAX_SLOW_FRAMES: u32 = 150;

    pub const DEFAULT_TARGET_RATES: [f64; 5] = [60.0, 50.0, 45.0, 40.0, 30.0];
    pub const DEFAULT_MINIMUM_RATES: [f64; 4] = [57.0, 48.0, 43.0, 38.0];

    pub const DEFAULT_INACTIVE_SLEEP_MILLIS: u64 = 250;
    pub const DEFAULT_REPORT_EVERY_FRAMES: u64 = 100;
}

pub use clock::{ManualClock, MonotonicClock, TimeSource};
pub use governor::{FrameRateGovernor, FrameReport, GovernorError, GovernorHandle, GovernorSettings};
