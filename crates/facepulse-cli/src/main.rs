mod synthetic;

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use facepulse_core::{
    AggregatedFramePayload, CentroidTracker, Collaborators, FusionConfig, FusionPipeline,
    FusionRunner, Publisher,
};

use synthetic::{
    BrightnessClassifier, FixedDemographics, GuestIdentity, Scene, SceneDetector, SyntheticCamera,
};

#[derive(Parser)]
#[command(name = "facepulse", about = "Face perception fusion and rPPG heart rate")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on a synthetic camera, one JSON payload per line on stdout
    Demo {
        /// TOML config file; FACEPULSE_* variables override it
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 300)]
        frames: u64,
        #[arg(long, default_value_t = 1)]
        faces: usize,
        /// Simulated pulse
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        /// Camera rate; also used as the rPPG sample rate
        #[arg(long)]
        fps: Option<f64>,
    },
    /// Print the effective configuration as TOML
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate a TOML config file
    CheckConfig { path: PathBuf },
}

/// Writes each payload as one JSON line
struct JsonLinesPublisher<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    fn publish(&mut self, payload: &AggregatedFramePayload) {
        match payload.to_json() {
            Ok(line) => {
                if let Err(e) = writeln!(self.out, "{}", line) {
                    log::warn!("Failed to write payload {}: {}", payload.frame_id, e);
                }
            }
            Err(e) => log::warn!("Failed to encode payload {}: {}", payload.frame_id, e),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FusionConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => FusionConfig::from_file_with_env(path)?,
        None => FusionConfig::load_layered(None, None)?,
    };
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Demo {
            config,
            frames,
            faces,
            bpm,
            fps,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(fps) = fps {
                config.runtime.capture_fps = fps;
                config.rppg.sample_rate = fps;
            }
            config.validate()?;

            let scene = Scene {
                faces: faces.max(1),
                bpm,
                fps: config.runtime.capture_fps,
            };
            log::info!(
                "Demo: {} frames, {} faces at {:.0} BPM, {:.1} fps",
                frames,
                scene.faces,
                scene.bpm,
                scene.fps
            );

            let min_confidence = config.runtime.detector_confidence_threshold;
            let pipeline = FusionPipeline::new(
                config,
                Collaborators {
                    classifier: Arc::new(BrightnessClassifier),
                    identity: Arc::new(GuestIdentity),
                    demographics: Arc::new(FixedDemographics),
                },
            )?;
            let detector = Arc::new(
                CentroidTracker::new(SceneDetector {
                    scene: scene.clone(),
                })
                .with_min_confidence(min_confidence),
            );
            let publisher = JsonLinesPublisher {
                out: std::io::stdout(),
            };

            let mut runner = FusionRunner::new(pipeline, detector, Box::new(publisher));
            runner.start_capture(Box::new(SyntheticCamera::new(scene, frames)))?;
            let summary = runner.run();

            let workers = runner.pipeline().worker_metrics();
            log::info!(
                "Published {} frames; collaborator calls: {} ok, {} failed, {} timed out, {} rejected",
                summary.frames_published,
                workers.jobs_succeeded,
                workers.jobs_failed,
                workers.jobs_timed_out,
                workers.jobs_rejected
            );
        }
        Commands::PrintConfig { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
        }
        Commands::CheckConfig { path } => {
            let config = FusionConfig::from_file(&path)?;
            println!(
                "{}: ok (rPPG {} samples at {} Hz, refresh every {} frames)",
                path.display(),
                config.rppg.capacity,
                config.rppg.sample_rate,
                config.biometrics.refresh_interval
            );
        }
    }
    Ok(())
}
