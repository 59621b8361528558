use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use frame_rate_governor::{
    clock::MonotonicClock,
    config::Config,
    driver::{DriverEvent, DriverSettings, FrameDriver, Simulation},
    governor::{FrameRateGovernor, FrameReport},
    logging::{LoggingConfig, init_logging},
};
use log::info;
use serde::Serialize;

/// Stand-in for a pinball table: burns a fixed amount of CPU per tick.
struct SyntheticTable {
    cost: Duration,
    ticks: u64,
    simulated_nanos: u64,
}

impl SyntheticTable {
    fn new(cost_ms: f64) -> Self {
        Self {
            cost: Duration::from_secs_f64(cost_ms / 1000.0),
            ticks: 0,
            simulated_nanos: 0,
        }
    }

    fn set_cost(&mut self, cost_ms: f64) {
        self.cost = Duration::from_secs_f64(cost_ms / 1000.0);
    }
}

impl Simulation for SyntheticTable {
    fn tick(&mut self, nanos: u64) {
        let until = Instant::now() + self.cost;
        while Instant::now() < until {
            std::hint::spin_loop();
        }
        self.ticks += 1;
        self.simulated_nanos += nanos;
    }
}

const EVENT_POLL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct RunSummary<'a> {
    config: &'a Config,
    stages: u64,
    ticks: u64,
    simulated_seconds: f64,
    report: FrameReport,
}

/// True when `total_frames` has passed a multiple of `every` not yet logged.
///
/// The watch channel keeps only the latest event, so the exact multiple may
/// never be observed.
fn crossed_report_boundary(logged: &mut u64, total_frames: u64, every: u64) -> bool {
    if every == 0 || total_frames / every <= *logged {
        return false;
    }
    *logged = total_frames / every;
    true
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default());

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let governor = FrameRateGovernor::with_settings(
        MonotonicClock::new(),
        &config.tiers.target,
        &config.tiers.minimum,
        config.hysteresis,
    )?;
    info!(
        "tiers {:?} fps, minimums {:?} fps, window {} frames",
        config.tiers.target, config.tiers.minimum, config.hysteresis.frame_history_size
    );

    let workload = config.workload;
    let table = Arc::new(Mutex::new(SyntheticTable::new(workload.cost_ms(0))));
    let settings = DriverSettings {
        // The stage logic below needs regular progress events.
        report_every: config.driver.report_every.max(1),
        ..config.driver
    };

    let (send, mut recv) = watch::channel(None::<DriverEvent>);
    let driver = FrameDriver::new(governor, Arc::clone(&table), || {}, settings)
        .spawn(move |event| {
            send.send(Some(event));
        })?;

    let handle = driver.handle();
    ctrlc::set_handler(move || {
        info!("interrupted, stopping render loop");
        handle.stop();
    })?;

    let handle = driver.handle();
    let report_every = config.driver.report_every;
    let mut logged = 0;
    let mut stage = 0;
    loop {
        let report = match recv.wait_timeout(EVENT_POLL) {
            // A panicked render thread never sends `Finished`.
            None if driver.is_finished() => break,
            None | Some(None) => continue,
            Some(Some(DriverEvent::Finished(_))) => break,
            Some(Some(DriverEvent::Progress(report))) => report,
        };
        if crossed_report_boundary(&mut logged, report.total_frames, report_every) {
            info!("[FPS] frame {} | {report}", report.total_frames);
        }

        let next_stage = workload.stage_at(report.total_frames);
        if next_stage > stage {
            stage = next_stage;
            let cost = workload.cost_ms(stage);
            table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_cost(cost);
            // New stage, new workload: earlier timings no longer apply.
            handle.reset_frame_rate();
            info!("stage {stage}: {cost:.1} ms per frame, retrying highest tier");
        }
    }

    let report = driver.join()?;
    let table = table.lock().unwrap_or_else(PoisonError::into_inner);
    info!("finished: {report} after {} frames", report.total_frames);

    if config.report.json {
        let summary = RunSummary {
            config: &config,
            stages: stage + 1,
            ticks: table.ticks,
            simulated_seconds: table.simulated_nanos as f64 / 1e9,
            report,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
