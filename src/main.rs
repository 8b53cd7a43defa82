use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use plantar_tracker_rs::{
    Calibration, CommandSource, MemoryStore, PressureTracker, SensorSource, SessionStore,
    SimulatedInsole, TrackerConfig, TrackerState,
};

#[derive(Parser, Debug)]
#[command(name = "plantar_tracker")]
#[command(about = "Plantar pressure insole tracker - live CoP, regions and heatmap", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Acquisition tick period in milliseconds
    #[arg(long, default_value = "500")]
    period_ms: u64,

    /// Output directory
    #[arg(long, default_value = "plantar_sessions")]
    output_dir: String,

    /// External reader command printing one JSON frame per invocation;
    /// when omitted, a simulated insole is used
    #[arg(long)]
    reader_cmd: Option<String>,

    /// Write live_status.json every N ticks
    #[arg(long, default_value = "4")]
    live_status_every: u64,

    /// Dump the composited heatmap surface every N ticks (0 = never)
    #[arg(long, default_value = "0")]
    heatmap_every: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("[{}] Plantar Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Tick period: {} ms", args.period_ms);
    println!("  Output Dir: {}", args.output_dir);
    println!(
        "  Source: {}",
        args.reader_cmd.as_deref().unwrap_or("simulated insole")
    );

    std::fs::create_dir_all(&args.output_dir)?;

    let config = TrackerConfig {
        tick_period_ms: args.period_ms,
        ..TrackerConfig::default()
    };

    let store = Arc::new(MemoryStore::new(
        Calibration::new(config.calibration_gain, config.calibration_exponent),
        config.layout.clone(),
        config.regions.clone(),
    ));
    let summary = store.start_session()?;
    let session_id = summary.id.clone();
    println!("[{}] Session {} started", ts_now(), session_id);

    let source: Box<dyn SensorSource> = match &args.reader_cmd {
        Some(cmd) => Box::new(CommandSource::new(cmd)),
        None => Box::new(SimulatedInsole::new(
            config.layout.sensor_ids().map(str::to_string),
        )),
    };

    let mut tracker = PressureTracker::new(config, store.clone(), source, summary);
    tracker.activate()?;

    let start = Utc::now();
    let mut ticker = interval(Duration::from_millis(args.period_ms));
    let mut tick_count = 0u64;

    loop {
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        ticker.tick().await;
        tracker.tick().await;
        tick_count += 1;

        if tracker.state() == TrackerState::Ended {
            break;
        }

        if args.live_status_every > 0 && tick_count % args.live_status_every == 0 {
            let status_path = format!("{}/live_status.json", args.output_dir);
            let _ = tracker.live_view().save(&status_path);
        }

        if args.heatmap_every > 0 && tick_count % args.heatmap_every == 0 {
            let heatmap_path = format!("{}/heatmap.ppm", args.output_dir);
            let _ = tracker.surface().write_ppm(&heatmap_path);
        }
    }

    // End the session through the store, then tear the loop down.
    let final_summary = store.end_session(&session_id).await?;
    tracker.end();

    // Final exports: full session log plus a last live-status snapshot.
    let detail = store.load_session(&session_id).await?;
    let export_path = format!("{}/{}_final.json", args.output_dir, session_id);
    std::fs::write(&export_path, detail.to_json()?)?;
    let _ = tracker
        .live_view()
        .save(&format!("{}/live_status_final.json", args.output_dir));
    println!(
        "[{}] Final save: {} samples to {}",
        ts_now(),
        detail.samples.len(),
        export_path
    );

    println!("\n=== Final Stats ===");
    println!("Ticks: {}", tick_count);
    println!("Samples persisted: {}", final_summary.sample_count);
    println!("Max pressure: {:.1} kPa", tracker.watermark_kpa());
    match tracker.cop() {
        Some(cop) => println!("Last CoP: ({:.0}, {:.0})", cop.x, cop.y),
        None => println!("Last CoP: no contact"),
    }
    for (region, average) in tracker.region_breakdown() {
        println!("Region {}: {:.1} kPa", region, average);
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
