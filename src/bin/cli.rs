use anyhow::{bail, Context, Result};
use fruitscan::source::StillImageOpener;
use fruitscan::{CameraLifecycle, FruitScanConfig, ScanError};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "Usage: fruitscan-cli [--config <path>] <command> [args]

Commands:
  detect <image>                          classify one image and record it
  stats [--json]                          print aggregate statistics
  history [limit] [--json]                print the newest detections
  reset-stats                             zero statistics and history
  watch [--index N] [--live] [--seconds S] [--image <path>]
                                          run the camera loop until Ctrl-C
  snapshot <out.jpg> [--index N]          save one annotated frame";

fn main() -> Result<()> {
    fruitscan::init_logging();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config_path = take_option(&mut args, "--config")?.map(PathBuf::from);

    if args.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let config = match &config_path {
        Some(path) => FruitScanConfig::load_layered(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FruitScanConfig::load_or_default(),
    };

    let command = args.remove(0);
    match command.as_str() {
        "detect" => cmd_detect(config, &args),
        "stats" => cmd_stats(config, &args),
        "history" => cmd_history(config, &args),
        "reset-stats" => cmd_reset_stats(config),
        "watch" => cmd_watch(config, &mut args),
        "snapshot" => cmd_snapshot(config, &mut args),
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}\n{}", command, USAGE);
            std::process::exit(1);
        }
    }
}

/// Remove `flag <value>` from `args`, returning the value.
fn take_option(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    let Some(pos) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    if pos + 1 >= args.len() {
        bail!("{} requires a value", flag);
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Ok(Some(value))
}

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    match args.iter().position(|a| a == flag) {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    }
}

fn open(config: FruitScanConfig) -> Result<CameraLifecycle> {
    CameraLifecycle::from_config(config).context("Failed to initialize inspection pipeline")
}

fn cmd_detect(config: FruitScanConfig, args: &[String]) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("Usage: fruitscan-cli detect <image>");
    };
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path))?;
    let lifecycle = open(config)?;

    let record = lifecycle.detect_image(&bytes, path)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_stats(config: FruitScanConfig, args: &[String]) -> Result<()> {
    let lifecycle = open(config)?;
    let snapshot = lifecycle.get_stats();

    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&snapshot.summary)?);
        return Ok(());
    }

    let summary = &snapshot.summary;
    println!("Detections:   {}", summary.total_detections);
    println!("Objects:      {}", summary.total_objects);
    println!("Non-objects:  {}", summary.total_non_objects);
    println!("OK:           {}", summary.objects_by_status.ok);
    println!("Defective:    {}", summary.objects_by_status.defective);
    println!("Success rate: {:.1}%", summary.success_rate * 100.0);
    for (fruit, count) in &summary.objects_by_type {
        println!("  {}: {}", fruit, count);
    }
    if let Some(updated) = snapshot.last_updated {
        println!("Last updated: {}", updated.to_rfc3339());
    }
    Ok(())
}

fn cmd_history(config: FruitScanConfig, args: &[String]) -> Result<()> {
    let limit = match args.iter().find(|a| !a.starts_with("--")) {
        Some(raw) => raw.parse().with_context(|| format!("Invalid history limit: {}", raw))?,
        None => 20,
    };
    let lifecycle = open(config)?;
    let (history, total) = lifecycle.get_history(limit);

    if args.iter().any(|a| a == "--json") {
        let body = serde_json::json!({ "history": history, "total": total });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("Showing {} of {} retained detections", history.len(), total);
    for record in history {
        println!(
            "{}  {:<11} {:.2} ({}) {:?}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.label.as_str(),
            record.confidence,
            record.source.as_str(),
            record.origin
        );
    }
    Ok(())
}

fn cmd_reset_stats(config: FruitScanConfig) -> Result<()> {
    let lifecycle = open(config)?;
    lifecycle.reset_stats()?;
    println!("Statistics reset");
    Ok(())
}

fn cmd_watch(config: FruitScanConfig, args: &mut Vec<String>) -> Result<()> {
    let index = match take_option(args, "--index")? {
        Some(raw) => raw.parse().with_context(|| format!("Invalid camera index: {}", raw))?,
        None => config.camera.default_index,
    };
    let seconds: Option<u64> = match take_option(args, "--seconds")? {
        Some(raw) => Some(raw.parse().with_context(|| format!("Invalid duration: {}", raw))?),
        None => None,
    };
    let live = take_flag(args, "--live");
    let still = take_option(args, "--image")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    let lifecycle = match &still {
        Some(path) => {
            let opener = StillImageOpener::from_path(path)?;
            CameraLifecycle::with_opener(config, Box::new(opener)).context("Failed to initialize inspection pipeline")?
        }
        None => open(config)?,
    };
    lifecycle.start(index)?;
    if live {
        lifecycle.toggle_live()?;
    }
    println!("Watching camera {} (live: {}). Press Ctrl-C to stop.", index, live);

    let started = Instant::now();
    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        if seconds.is_some_and(|s| started.elapsed() >= Duration::from_secs(s)) {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));

        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let status = lifecycle.status();
            let verdict = lifecycle
                .latest()
                .map(|l| format!("{} {:.2}", l.analysis.verdict.label, l.analysis.verdict.confidence))
                .unwrap_or_else(|| "-".to_string());
            println!("[{:?}] frames={} verdict={}", status.state, status.frame_count, verdict);
            if let Some(err) = status.last_error {
                eprintln!("Camera error: {}", err);
                break;
            }
        }
    }

    lifecycle.stop()?;
    let summary = &lifecycle.get_stats().summary;
    println!(
        "Stopped. {} detections recorded ({} OK, {} defective)",
        summary.total_detections, summary.objects_by_status.ok, summary.objects_by_status.defective
    );
    Ok(())
}

fn cmd_snapshot(config: FruitScanConfig, args: &mut Vec<String>) -> Result<()> {
    let index = match take_option(args, "--index")? {
        Some(raw) => raw.parse().with_context(|| format!("Invalid camera index: {}", raw))?,
        None => config.camera.default_index,
    };
    let Some(out) = args.first().cloned() else {
        bail!("Usage: fruitscan-cli snapshot <out.jpg> [--index N]");
    };
    let timeout = Duration::from_millis(config.camera.first_frame_timeout_ms);

    let lifecycle = open(config)?;
    lifecycle.start(index)?;

    let deadline = Instant::now() + timeout;
    let jpeg = loop {
        match lifecycle.latest_annotated_frame() {
            Ok(jpeg) => break jpeg,
            Err(ScanError::NoFrameAvailable(_)) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                let _ = lifecycle.stop();
                return Err(e).context("No frame from camera");
            }
        }
    };
    lifecycle.stop()?;

    std::fs::write(&out, &jpeg).with_context(|| format!("Failed to write {}", out))?;
    println!("Saved {} ({} bytes)", out, jpeg.len());
    Ok(())
}
