//! Render-loop thread that paces itself with a [`FrameRateGovernor`].
//!
//! The simulation and the renderer are external collaborators; the driver
//! only decides when each frame starts and how far to advance the simulation.

use crate::clock::TimeSource;
use crate::constants::*;
use crate::governor::{FrameRateGovernor, FrameReport, GovernorHandle};
use log::{debug, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// The thing being animated, e.g. a pinball table's physics world.
pub trait Simulation: Send {
    /// Advances the simulation by `nanos` of simulated time.
    fn tick(&mut self, nanos: u64);

    /// False when nothing is moving and frames need not be produced at full rate.
    fn is_active(&self) -> bool {
        true
    }

    /// Simulated time per unit of real time.
    fn time_ratio(&self) -> f64 {
        1.0
    }
}

pub trait Renderer: Send {
    fn draw(&mut self);
}

impl<F> Renderer for F
where
    F: FnMut() + Send,
{
    fn draw(&mut self) {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriverSettings {
    /// Sleep per frame while the simulation is idle.
    #[serde(rename = "inactive-sleep")]
    pub inactive_sleep_ms: u64,
    /// Frames between progress reports; 0 disables them.
    pub report_every: u64,
    /// Stop after this many frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<u64>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            inactive_sleep_ms: DEFAULT_INACTIVE_SLEEP_MILLIS,
            report_every: DEFAULT_REPORT_EVERY_FRAMES,
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverEvent {
    Progress(FrameReport),
    Finished(FrameReport),
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("render thread panicked")]
    Panicked,
}

/// Controls a driver from any thread, including a signal handler.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    running: Arc<AtomicBool>,
    governor: GovernorHandle,
}

impl DriverHandle {
    /// Ends the loop after the current frame, cutting its pacing sleep short.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.governor.interrupt();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn reset_frame_rate(&self) {
        self.governor.request_reset();
    }
}

pub struct FrameDriver<C, S, R> {
    governor: FrameRateGovernor<C>,
    simulation: Arc<Mutex<S>>,
    renderer: R,
    settings: DriverSettings,
    running: Arc<AtomicBool>,
}

impl<C, S, R> FrameDriver<C, S, R>
where
    C: TimeSource,
    S: Simulation,
    R: Renderer,
{
    pub fn new(
        governor: FrameRateGovernor<C>,
        simulation: Arc<Mutex<S>>,
        renderer: R,
        settings: DriverSettings,
    ) -> Self {
        Self {
            governor,
            simulation,
            renderer,
            settings,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            running: Arc::clone(&self.running),
            governor: self.governor.handle(),
        }
    }

    /// Runs the loop on the current thread until stopped or `max_frames` is reached.
    pub fn run<F>(mut self, mut reporter: F) -> FrameReport
    where
        F: FnMut(DriverEvent),
    {
        let pacing = self.governor.handle();
        let inactive_sleep = Duration::from_millis(self.settings.inactive_sleep_ms);
        let mut idle = false;
        info!(
            "render loop started, target {:.1} fps",
            self.governor.target_frames_per_second()
        );

        while self.running.load(Ordering::Acquire) {
            if let Some(max) = self.settings.max_frames {
                if self.governor.total_frames() >= max {
                    info!("reached max_frames={max}");
                    break;
                }
            }

            self.governor.frame_started();
            let active = {
                let mut simulation = self
                    .simulation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let active = simulation.is_active();
                let real_nanos = if active {
                    NANOS_PER_SECOND as f64 / self.governor.target_frames_per_second()
                } else {
                    inactive_sleep.as_nanos() as f64
                };
                let ratio = simulation.time_ratio();
                simulation.tick((real_nanos * ratio) as u64);
                active
            };
            self.renderer.draw();

            if !active {
                if !idle {
                    debug!("simulation idle, pacing suspended");
                    idle = true;
                }
                // The idle gap must not be measured as slow frames.
                self.governor.clear_timestamps();
                pacing.sleep(inactive_sleep);
                continue;
            }
            if idle {
                debug!("simulation active again");
                idle = false;
            }

            self.governor.sleep_until_next_frame();

            let every = self.settings.report_every;
            if every > 0 && self.governor.total_frames() % every == 0 {
                reporter(DriverEvent::Progress(self.governor.report()));
            }
        }

        let report = self.governor.report();
        info!("render loop stopped: {report} after {} frames", report.total_frames);
        reporter(DriverEvent::Finished(report));
        report
    }
}

impl<C, S, R> FrameDriver<C, S, R>
where
    C: TimeSource + Send + 'static,
    S: Simulation + 'static,
    R: Renderer + 'static,
{
    /// Moves the loop onto its own named thread.
    pub fn spawn<F>(self, reporter: F) -> Result<RunningDriver, DriverError>
    where
        F: FnMut(DriverEvent) + Send + 'static,
    {
        let handle = self.handle();
        let thread = std::thread::Builder::new()
            .name("frame-driver".into())
            .spawn(move || self.run(reporter))
            .map_err(DriverError::Spawn)?;
        Ok(RunningDriver { handle, thread })
    }
}

pub struct RunningDriver {
    handle: DriverHandle,
    thread: JoinHandle<FrameReport>,
}

impl RunningDriver {
    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    /// True once the render thread has exited, normally or by panicking.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loop to end and returns its final report.
    pub fn join(self) -> Result<FrameReport, DriverError> {
        self.thread.join().map_err(|_| DriverError::Panicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::governor::GovernorSettings;

    #[derive(Default)]
    struct CountingTable {
        ticks: u64,
        simulated_nanos: u64,
        active: bool,
    }

    impl Simulation for CountingTable {
        fn tick(&mut self, nanos: u64) {
            self.ticks += 1;
            self.simulated_nanos += nanos;
        }

        fn is_active(&self) -> bool {
            self.active
        }

        fn time_ratio(&self) -> f64 {
            2.0
        }
    }

    fn fast_governor() -> FrameRateGovernor<ManualClock> {
        // A frozen clock makes every pacing sleep last one frame period, ~1 ms here.
        FrameRateGovernor::single_rate(ManualClock::new(0), 1000.0).unwrap()
    }

    fn table(active: bool) -> Arc<Mutex<CountingTable>> {
        Arc::new(Mutex::new(CountingTable {
            active,
            ..CountingTable::default()
        }))
    }

    #[test]
    fn runs_until_max_frames_and_reports() {
        let simulation = table(true);
        let mut draws = 0u32;
        let mut events = Vec::new();
        let settings = DriverSettings {
            inactive_sleep_ms: 1,
            report_every: 2,
            max_frames: Some(5),
        };

        let renderer = || draws += 1;
        let report = FrameDriver::new(fast_governor(), Arc::clone(&simulation), renderer, settings)
            .run(|event| events.push(event));

        assert_eq!(report.total_frames, 5);
        assert_eq!(draws, 5);
        let simulation = simulation.lock().unwrap();
        assert_eq!(simulation.ticks, 5);
        // 1 ms per frame at 1000 fps, doubled by the time ratio.
        assert_eq!(simulation.simulated_nanos, 5 * 2 * NANOS_PER_MILLI);

        let progress: Vec<u64> = events
            .iter()
            .filter_map(|event| match event {
                DriverEvent::Progress(report) => Some(report.total_frames),
                DriverEvent::Finished(_) => None,
            })
            .collect();
        assert_eq!(progress, vec![2, 4]);
        assert_eq!(events.last(), Some(&DriverEvent::Finished(report)));
    }

    #[test]
    fn idle_simulation_clears_measurements() {
        let simulation = table(false);
        let settings = DriverSettings {
            inactive_sleep_ms: 1,
            report_every: 1,
            max_frames: Some(12),
        };

        let mut progress = 0;
        let report = FrameDriver::new(fast_governor(), Arc::clone(&simulation), || {}, settings)
            .run(|event| {
                if let DriverEvent::Progress(_) = event {
                    progress += 1;
                }
            });

        assert_eq!(report.total_frames, 12);
        assert_eq!(report.current_fps, None);
        assert_eq!(progress, 0);
        let simulation = simulation.lock().unwrap();
        assert_eq!(simulation.simulated_nanos, 12 * 2 * NANOS_PER_MILLI);
    }

    #[test]
    fn stop_from_another_thread_ends_spawned_loop() {
        let governor = FrameRateGovernor::single_rate(ManualClock::new(0), 1.0).unwrap();
        let running = FrameDriver::new(governor, table(true), || {}, DriverSettings::default())
            .spawn(|_| {})
            .unwrap();
        let handle = running.handle();
        assert!(handle.is_running());

        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
        let report = running.join().unwrap();
        assert!(!handle.is_running());
        // One frame per second: the stop interrupts the first pacing sleep,
        // or lands before the thread got to its first frame.
        assert!(report.total_frames <= 1);
    }

    #[test]
    fn reset_through_driver_handle_is_deferred() {
        let governor = fast_governor();
        let pacing = governor.handle();
        let driver = FrameDriver::new(governor, table(true), || {}, DriverSettings::default());

        driver.handle().reset_frame_rate();
        assert!(pacing.reset_pending());
    }

    #[test]
    fn reset_restores_highest_tier_on_next_frame() {
        let clock = ManualClock::new(0);
        let settings = GovernorSettings {
            frame_history_size: 1,
            max_good_frames: 0,
            max_slow_frames: 1,
            ..GovernorSettings::default()
        };
        let mut governor =
            FrameRateGovernor::with_settings(clock.clone(), &[1000.0, 500.0], &[900.0], settings)
                .unwrap();
        // One 100 fps window is enough to drop to the second tier.
        governor.frame_started();
        clock.advance(10 * NANOS_PER_MILLI);
        governor.frame_started();
        assert_eq!(governor.target_frames_per_second(), 500.0);

        let pacing = governor.handle();
        let settings = DriverSettings {
            inactive_sleep_ms: 1,
            report_every: 0,
            max_frames: Some(5),
        };
        let driver = FrameDriver::new(governor, table(true), || {}, settings);
        driver.handle().reset_frame_rate();
        let report = driver.run(|_| {});

        assert!(!pacing.reset_pending());
        assert_eq!(report.total_frames, 5);
        assert_eq!(report.target_fps, 1000.0);
        assert!(!report.locked);
    }

    struct PanickingTable;

    impl Simulation for PanickingTable {
        fn tick(&mut self, _nanos: u64) {
            panic!("physics blew up");
        }
    }

    #[test]
    fn panicking_simulation_is_reported_on_join() {
        let mut events = 0;
        let (send, recv) = std::sync::mpsc::channel();
        let running = FrameDriver::new(
            fast_governor(),
            Arc::new(Mutex::new(PanickingTable)),
            || {},
            DriverSettings::default(),
        )
        .spawn(move |event| {
            let _ = send.send(event);
        })
        .unwrap();

        while !running.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        while recv.try_recv().is_ok() {
            events += 1;
        }
        assert_eq!(events, 0);
        assert!(matches!(running.join(), Err(DriverError::Panicked)));
    }
}
