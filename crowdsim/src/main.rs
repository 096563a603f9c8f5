mod args;

use std::{
    fs::{self, File},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Instant,
};

use args::Args;
use clap::Parser;
use crowdsim_core::{
    benchmark::{self, DEFAULT_TICKS},
    diagnostic::DiagnosticLog,
    scenario::Scenario,
    Model,
};
use log::{info, warn};

static SIG_INT: AtomicBool = AtomicBool::new(false);

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module("crowdsim", log::LevelFilter::Info)
        .filter_module("crowdsim_core", log::LevelFilter::Info)
        .init();

    if cfg!(debug_assertions) {
        warn!("Debug build");
    }

    let args = Args::parse();
    let scenario: Scenario = toml::from_str(&fs::read_to_string(&args.scenario)?)?;
    let options = args.to_model_options(&scenario);
    if let Some(threads) = args.ignored_threads() {
        warn!(
            "--threads {threads} has no effect on the {} strategy",
            args.implementation
        );
    }

    if args.timing_mode {
        info!("Timing mode on");
        let ticks = args.ticks.unwrap_or(DEFAULT_TICKS);
        let report = benchmark::run(&scenario, args.implementation, args.threads, ticks, &options)?;
        println!("{report}");
        return Ok(());
    }

    let mut model = Model::setup(
        scenario.agents()?,
        scenario.waypoints(),
        args.implementation,
        options,
    )?;
    if let Some(threads) = args.threads {
        model.set_thread_num(threads)?;
    }

    info!("Run as headless mode");
    ctrlc::set_handler(|| SIG_INT.store(true, Ordering::SeqCst))?;

    let ticks = args.ticks.unwrap_or(0);
    let start = Instant::now();
    while ticks == 0 || model.tick_count() < ticks {
        if SIG_INT.load(Ordering::SeqCst) {
            break;
        }

        let metrics = model.tick()?;
        if model.tick_count() % 100 == 0 {
            info!(
                "Tick: {:6}, Agents: {:6}, Step: {:8.3}ms",
                model.tick_count(),
                metrics.agent_count,
                metrics.time_step * 1000.0
            );
        }
    }

    let elapsed_ms = (start.elapsed().as_secs_f64() * 1000.0).max(1e-3);
    info!(
        "Time: {:.3} milliseconds, {:.2} Frames Per Second.",
        elapsed_ms,
        model.tick_count() as f64 / elapsed_ms * 1000.0
    );

    if args.export_log {
        export_log(model.diagnostic_log())?;
    }

    Ok(())
}

fn export_log(diagnostic_log: &DiagnosticLog) -> anyhow::Result<()> {
    let current_time = chrono::Local::now();
    fs::create_dir("logs").ok();
    let log_path: PathBuf = [
        "logs",
        &current_time.format("%Y-%m-%d_%H%M%S_log.json").to_string(),
    ]
    .iter()
    .collect();
    let mut log_file = File::create(&log_path)?;

    serde_json::to_writer(&mut log_file, diagnostic_log)?;
    info!("Exported log file: {}", log_path.display());

    Ok(())
}
