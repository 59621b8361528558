use std::{
    io::{Error as IoError, ErrorKind},
    path::Path,
};

use frame_rate_governor::{
    clock::ManualClock,
    config::Config,
    constants::NANOS_PER_SECOND,
    governor::FrameRateGovernor,
    logging::{LoggingConfig, init_logging},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments: program <fps> [frames] [config_file]
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <fps> [frames] [config_file]", args[0]);
        eprintln!("  fps: Frame rate the simulated render loop achieves");
        eprintln!("  frames: Number of frames to simulate (default: 2000)");
        eprintln!("  config_file: Optional path to config.toml (tiers and hysteresis)");
        eprintln!();
        eprintln!("Example: {} 52.5 5000", args[0]);
        std::process::exit(1);
    }

    // Governor events are printed below; keep the logger quiet unless asked.
    init_logging(LoggingConfig {
        env_filter: Some(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string())),
        ..LoggingConfig::default()
    });

    let fps: f64 = args[1]
        .parse()
        .ok()
        .filter(|fps: &f64| fps.is_finite() && *fps > 0.0)
        .ok_or(IoError::new(ErrorKind::InvalidInput, "fps must be a positive number"))?;

    let frames: u64 = match args.get(2) {
        Some(s) => s.parse().map_err(|_| {
            IoError::new(ErrorKind::InvalidInput, "frames must be a non-negative integer")
        })?,
        None => 2000,
    };

    let config = Config::load(args.get(3).map(Path::new))?;

    let clock = ManualClock::new(0);
    let mut governor = FrameRateGovernor::with_settings(
        clock.clone(),
        &config.tiers.target,
        &config.tiers.minimum,
        config.hysteresis,
    )?;

    let interval = (NANOS_PER_SECOND as f64 / fps) as u64;
    println!(
        "Simulating {frames} frames at {fps:.1} fps ({interval} ns apart), starting at {:.1} fps",
        governor.target_frames_per_second()
    );

    let mut tier = governor.tier_index();
    let mut locked = governor.is_locked();
    for frame in 1..=frames {
        governor.frame_started();

        if governor.tier_index() != tier {
            println!(
                "  frame {frame:>7}: ↓ target {:.1} fps (measured {:.1} fps)",
                governor.target_frames_per_second(),
                governor.current_frames_per_second().unwrap_or_default()
            );
            tier = governor.tier_index();
        }
        if governor.is_locked() != locked {
            println!(
                "  frame {frame:>7}: locked at {:.1} fps",
                governor.target_frames_per_second()
            );
            locked = governor.is_locked();
        }

        clock.advance(interval);
    }

    println!("Final: {}", governor.report());
    println!(
        "Next wait: {:.3} ms",
        governor.nanos_to_wait_until_next_frame() as f64 / 1e6
    );
    Ok(())
}
