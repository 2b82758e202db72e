use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

use fall_tracker_rs::alert::AlertTrigger;
use fall_tracker_rs::scorer::AnomalyScorer;
use fall_tracker_rs::sensors::{self, AccelData, GyroData};
use fall_tracker_rs::status::PipelineStatus;
use fall_tracker_rs::synchronizer::{CompoundSample, SampleSynchronizer};
use fall_tracker_rs::uploader::{
    ConnectivityPolicy, HttpStorageSink, UploadBatch, UploadQueue, WifiPolicy,
    DEFAULT_RETRY_BUDGET,
};
use fall_tracker_rs::windower::ticker_loop;

#[derive(Parser, Debug)]
#[command(name = "fall_tracker")]
#[command(about = "Streaming fall detection - windowed anomaly scoring with connectivity-gated upload", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Base URL of the anomaly detector service
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    detector_url: String,

    /// Base URL of the remote storage sink
    #[arg(long, default_value = "http://127.0.0.1:9000")]
    storage_url: String,

    /// Sampling tick interval in milliseconds
    #[arg(long, default_value = "10")]
    tick_interval_ms: u64,

    /// Upload accumulation interval in seconds
    #[arg(long, default_value = "600")]
    upload_interval_secs: u64,

    /// Total sink attempts per batch per flush cycle
    #[arg(long, default_value_t = DEFAULT_RETRY_BUDGET)]
    retry_budget: u32,

    /// Upload on any connectivity, not just Wi-Fi
    #[arg(long)]
    upload_without_wifi: bool,

    /// Override the detector's advertised window size
    #[arg(long)]
    window_size: Option<usize>,

    /// Audio cue played on an anomalous window
    #[arg(long)]
    alert_sound: Option<String>,

    /// Output directory for status files
    #[arg(long, default_value = "fall_tracker_sessions")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("[{}] Fall Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Detector: {}", args.detector_url);
    println!("  Storage: {}", args.storage_url);
    println!("  Upload without Wi-Fi: {}", args.upload_without_wifi);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    // The detector advertises its window size and threshold; both are fetched
    // once up front.
    let scorer = AnomalyScorer::connect(&args.detector_url).await?;
    let window_size = args.window_size.unwrap_or_else(|| scorer.window_size());
    println!(
        "[{}] Window size {} samples, threshold {}",
        ts_now(),
        window_size,
        scorer.threshold()
    );

    // Channels for sensor readings, scored windows and the raw record stream
    let (accel_tx, mut accel_rx) = mpsc::channel::<AccelData>(500);
    let (gyro_tx, mut gyro_rx) = mpsc::channel::<GyroData>(500);
    let (window_tx, mut window_rx) = mpsc::channel(32);
    let (record_tx, mut record_rx) = mpsc::channel::<CompoundSample>(1024);

    let sync = Arc::new(SampleSynchronizer::new());

    // Sensor acquisition tasks (hold handles to keep tasks alive)
    let _accel_handle = tokio::spawn(sensors::accel_loop(accel_tx.clone()));
    let _gyro_handle = tokio::spawn(sensors::gyro_loop(gyro_tx.clone()));
    drop(accel_tx);
    drop(gyro_tx);

    // Ingest task: readings replace the synchronizer's last-known slots
    let ingest_sync = sync.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_accel = accel_rx.recv() => match maybe_accel {
                    Some(reading) => ingest_sync.on_accel(reading),
                    None => break,
                },
                maybe_gyro = gyro_rx.recv() => match maybe_gyro {
                    Some(reading) => ingest_sync.on_gyro(reading),
                    None => break,
                },
            }
        }
        eprintln!("[ingest] Sensor channels closed");
    });

    // Sampling ticker: snapshots, windows, raw record fan-out. Scoring
    // latency never touches this task.
    let _ticker_handle = tokio::spawn(ticker_loop(
        sync.clone(),
        Duration::from_millis(args.tick_interval_ms),
        window_size,
        window_tx,
        record_tx,
    ));

    // Upload queue: Wi-Fi gated unless overridden at startup (the flag stays
    // flippable at runtime through this handle)
    let allow_any = Arc::new(AtomicBool::new(args.upload_without_wifi));
    let policy: Arc<dyn ConnectivityPolicy> = Arc::new(WifiPolicy::new(allow_any.clone()));
    let queue = Arc::new(UploadQueue::new(
        HttpStorageSink::new(&args.storage_url),
        policy,
        args.retry_budget,
    ));

    let batches_flushed = Arc::new(AtomicU64::new(0));

    // Batcher task: accumulate raw records, flush a batch every interval.
    // Each flush cycle runs detached so a slow sink never blocks accumulation.
    let batcher_queue = queue.clone();
    let batcher_counter = batches_flushed.clone();
    let upload_interval = Duration::from_secs(args.upload_interval_secs.max(1));
    tokio::spawn(async move {
        let mut buf: Vec<CompoundSample> = Vec::new();
        let mut flush_tick = tokio::time::interval(upload_interval);
        flush_tick.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                maybe_record = record_rx.recv() => match maybe_record {
                    Some(record) => buf.push(record),
                    None => break,
                },
                _ = flush_tick.tick() => {
                    if let Some(batch) = UploadBatch::new(std::mem::take(&mut buf)) {
                        batcher_counter.fetch_add(1, Ordering::Relaxed);
                        let queue = batcher_queue.clone();
                        tokio::spawn(async move { queue.flush(batch).await });
                    }
                }
            }
        }

        // Record stream ended; push the remainder through one last cycle
        if let Some(batch) = UploadBatch::new(buf) {
            batcher_counter.fetch_add(1, Ordering::Relaxed);
            batcher_queue.flush(batch).await;
        }
        eprintln!("[batcher] Record channel closed");
    });

    let alert = AlertTrigger::new(args.alert_sound.clone());

    // Main scoring loop
    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let mut status = PipelineStatus::new();

    println!("[{}] Pipeline running", ts_now());

    loop {
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        // Bounded wait so the duration check keeps running with no windows
        match tokio::time::timeout(Duration::from_millis(250), window_rx.recv()).await {
            Ok(Some(window)) => match scorer.score(&window).await {
                Ok(result) => {
                    status.windows_scored += 1;
                    log::info!("mean squared error: {}", result.error);

                    if result.is_anomalous {
                        status.anomalies_detected += 1;
                        log::warn!(
                            "Anomalous window: error {} > threshold {}",
                            result.error,
                            scorer.threshold()
                        );
                        if let Err(e) = alert.on_anomalous() {
                            status.alert_failures += 1;
                            log::error!("Alert failed: {}", e);
                        }
                    }
                }
                Err(e) => {
                    status.score_failures += 1;
                    log::warn!("Window dropped: {}", e);
                }
            },
            Ok(None) => {
                println!("[{}] Window channel closed, stopping...", ts_now());
                break;
            }
            Err(_) => {
                // No window this interval
            }
        }

        // Update live status every 2 seconds
        let now = Utc::now();
        if (now.signed_duration_since(last_status_update).num_seconds() as u64) >= 2 {
            status.timestamp_ms = sensors::current_millis();
            status.batches_flushed = batches_flushed.load(Ordering::Relaxed);
            status.pending_batches = queue.pending_len();
            status.uptime_seconds = now.signed_duration_since(start).num_seconds().max(0) as u64;

            let status_path = format!("{}/live_status.json", args.output_dir);
            let _ = status.save(&status_path);
            last_status_update = now;
        }
    }

    // Final status snapshot
    status.timestamp_ms = sensors::current_millis();
    status.batches_flushed = batches_flushed.load(Ordering::Relaxed);
    status.pending_batches = queue.pending_len();
    status.uptime_seconds = Utc::now()
        .signed_duration_since(start)
        .num_seconds()
        .max(0) as u64;
    let status_path = format!("{}/live_status_final.json", args.output_dir);
    let _ = status.save(&status_path);

    println!("\n=== Final Stats ===");
    println!("Windows scored: {}", status.windows_scored);
    println!("Anomalies detected: {}", status.anomalies_detected);
    println!("Score failures: {}", status.score_failures);
    println!("Batches flushed: {}", status.batches_flushed);
    println!("Pending backlog: {}", status.pending_batches);

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
