//! SprayCheck - automated catheter spray-code verification
//!
//! Captures an image of a catheter (file or live camera), locates the
//! label and spray-print text regions, and verifies that the printed code
//! matches the label exactly.

mod capture;
mod compare;
mod config;
mod session;
mod storage;
mod vision;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::capture::CameraEvent;
use crate::compare::{OpKind, TextComparator};
use crate::config::AppConfig;
use crate::session::{VerificationOutcome, VerifySession};
use crate::storage::HistoryStore;
use crate::vision::{RecognizedLine, TextOcr};

/// SprayCheck - catheter spray-code verification
#[derive(Parser, Debug)]
#[command(name = "spraycheck")]
#[command(about = "Verify catheter spray codes against their labels")]
struct Args {
    /// Verify the text regions in an image file
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Capture one frame from this camera index and verify it
    #[arg(long)]
    camera: Option<u32>,

    /// Compare two raw text values directly
    #[arg(long, num_args = 2, value_names = ["LABEL", "PRINT"])]
    compare: Option<Vec<String>>,

    /// Print stored verification history and exit
    #[arg(long)]
    history: bool,

    /// Output history as JSON
    #[arg(long)]
    json: bool,

    /// Path to the configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Placeholder OCR wiring: reports no detections
///
/// TODO: link the production PaddleOCR engine behind the TextOcr trait
struct UnconfiguredOcr;

impl TextOcr for UnconfiguredOcr {
    fn detect(&mut self, _image: &image::RgbImage) -> Result<Vec<Vec<(f32, f32)>>> {
        Ok(Vec::new())
    }

    fn recognize(&mut self, _image: &image::RgbImage) -> Result<Vec<RecognizedLine>> {
        Ok(Vec::new())
    }
}

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = load_config_or_default(args.config.as_deref())?;

    if args.history {
        return run_history(args.json);
    }

    if let Some(texts) = &args.compare {
        run_compare(&config, &texts[0], &texts[1]);
        return Ok(());
    }

    if let Some(path) = &args.image {
        return run_verify_image(&config, path);
    }

    if let Some(index) = args.camera {
        return run_verify_camera(&config, index);
    }

    bail!("nothing to do: pass --image, --camera, --compare or --history (see --help)");
}

/// Load configuration from an explicit path, the user config dir, or defaults
fn load_config_or_default(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let loaded = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(loaded);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            if let Ok(loaded) = config::load_config(&config_path) {
                info!("Loaded configuration from {:?}", config_path);
                return Ok(loaded);
            }
            warn!("Ignoring unreadable configuration at {:?}", config_path);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Verify the regions in a file image
fn run_verify_image(config: &AppConfig, path: &Path) -> Result<()> {
    let history = HistoryStore::open(&storage::default_history_path()?)?;
    let mut session = VerifySession::new(config, Box::new(UnconfiguredOcr), history);

    session.load_image(path)?;
    let outcome = session.recognize()?;
    print_outcome(&outcome);
    Ok(())
}

/// Capture one frame from the camera and verify it
fn run_verify_camera(config: &AppConfig, index: u32) -> Result<()> {
    let mut config = config.clone();
    config.capture.camera_index = index;

    let history = HistoryStore::open(&storage::default_history_path()?)?;
    let mut session = VerifySession::new(&config, Box::new(UnconfiguredOcr), history);
    if config.storage.save_captures {
        session.set_captures_dir(Some(storage::get_captures_dir()?));
    }

    session.start_live()?;

    // Wait for the first frame, surfacing camera failures as they arrive
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        for event in session.poll_camera() {
            if let CameraEvent::Error(message) = event {
                bail!("camera failed: {}", message);
            }
        }
        if let Some(frame) = session.latest_frame() {
            let (width, height) = frame.dimensions();
            info!("Captured frame {}x{}", width, height);
            break;
        }
        if Instant::now() > deadline {
            session.stop();
            bail!("timed out waiting for the first camera frame");
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    let outcome = session.recognize()?;
    print_outcome(&outcome);
    session.stop();
    Ok(())
}

/// Compare two raw texts without a camera or image
fn run_compare(config: &AppConfig, label: &str, print: &str) {
    let comparator = TextComparator::new(config.compare.clone());
    let result = comparator.compare(label, print);

    println!("Label:      {}", label);
    println!("Print:      {}", print);
    println!("Similarity: {:.1}%", result.similarity * 100.0);
    println!("Result:     {}", if result.is_match { "PASS" } else { "FAIL" });
    for segment in result.diff.iter().filter(|s| s.kind != OpKind::Equal) {
        println!(
            "  {:?}: {:?} -> {:?}",
            segment.kind, segment.left_value, segment.right_value
        );
    }
}

/// Print stored history, newest first
fn run_history(json: bool) -> Result<()> {
    let store = HistoryStore::open(&storage::default_history_path()?)?;
    let records = store.all_records()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No verification history.");
        return Ok(());
    }
    for record in &records {
        println!(
            "{}  {:4}  {:5.1}%  {}  vs  {}  ({})",
            record.timestamp,
            record.result,
            record.similarity * 100.0,
            record.sign_text,
            record.print_text,
            record.image_path
        );
    }
    Ok(())
}

/// Print one verification outcome for the operator
fn print_outcome(outcome: &VerificationOutcome) {
    if outcome.regions.is_empty() {
        warn!("No text regions detected in the input image");
    }
    println!("Label text: {}", outcome.label.text);
    println!("Print text: {}", outcome.print.text);
    println!("Similarity: {:.1}%", outcome.comparison.similarity * 100.0);
    println!(
        "Result:     {}",
        if outcome.comparison.is_match {
            "PASS"
        } else {
            "FAIL"
        }
    );
    if let Some(record) = &outcome.record {
        if !record.image_path.is_empty() {
            println!("Snapshot:   {}", record.image_path);
        }
    }
}
