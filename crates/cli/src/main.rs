use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, select};
use indicatif::{ProgressBar, ProgressStyle};
use jobs::{
    ControllerConfig, CropRect, HwVendor, JobState, Outcome, TranscodeController, TranscodeRequest,
};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const BAR_SCALE: u64 = 1000;

#[derive(Parser)]
#[command(name = "cropper-cli")]
#[command(about = "Crop a video with FFmpeg, with live progress and pause/resume/cancel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON controller config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crop a video; type p/r/c + Enter to pause, resume or cancel
    Crop(CropArgs),

    /// Print the encoder command line without running it
    Args {
        #[command(flatten)]
        crop: CropArgs,

        /// Emit JSON instead of one argument per line
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone)]
struct CropArgs {
    /// Source video
    source: PathBuf,

    /// Left edge of the crop, in source pixels
    #[arg(long, default_value = "0")]
    x: u32,

    /// Top edge of the crop, in source pixels
    #[arg(long, default_value = "0")]
    y: u32,

    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    /// GPU vendor classification (intel, nvidia, amd); software crop when omitted
    #[arg(long)]
    hw: Option<HwVendor>,

    /// Encoder executable (defaults to ffmpeg on PATH)
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    #[arg(long)]
    quality: Option<u8>,

    #[arg(long)]
    preset: Option<String>,

    /// Output name suffix, inserted before the extension
    #[arg(long)]
    suffix: Option<String>,
}

impl CropArgs {
    fn request(&self) -> TranscodeRequest {
        TranscodeRequest::new(
            self.source.clone(),
            CropRect::new(self.x, self.y, self.width, self.height),
        )
        .with_hw_vendor(self.hw)
    }

    fn apply_overrides(&self, config: &mut ControllerConfig) {
        if let Some(p) = &self.ffmpeg {
            config.ffmpeg_path = Some(p.clone());
        }
        if let Some(q) = self.quality {
            config.quality = q;
        }
        if let Some(p) = &self.preset {
            config.preset = p.clone();
        }
        if let Some(s) = &self.suffix {
            config.output_suffix = s.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Crop(args) => {
            let config = load_config(cli.config.as_deref(), &args)?;
            crop_command(config, args).await
        }
        Commands::Args { crop, json } => {
            let config = load_config(cli.config.as_deref(), &crop)?;
            args_command(config, crop, json)
        }
    }
}

fn load_config(path: Option<&Path>, args: &CropArgs) -> Result<ControllerConfig> {
    let mut config = match path {
        Some(p) => ControllerConfig::load(p).with_context(|| format!("loading {}", p.display()))?,
        None => ControllerConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn args_command(config: ControllerConfig, args: CropArgs, json: bool) -> Result<()> {
    let controller = TranscodeController::new(config);
    let request = args.request();
    let (destination, encoder_args) = controller.planned_args(&request)?;
    let program = media_io::locate_ffmpeg(controller.config().ffmpeg_path.as_deref())
        .unwrap_or_else(|_| PathBuf::from("ffmpeg"));
    let encoder_args: Vec<String> = encoder_args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    if json {
        let value = serde_json::json!({
            "program": program,
            "source": request.source,
            "crop": request.crop,
            "hw_vendor": request.hw_vendor,
            "destination": destination,
            "args": encoder_args,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", program.display());
        for a in &encoder_args {
            println!("  {a}");
        }
    }
    Ok(())
}

async fn crop_command(config: ControllerConfig, args: CropArgs) -> Result<()> {
    let request = args.request();
    let controller = TranscodeController::new(config);

    info!(
        "Cropping {:?} to {}x{} at ({}, {})",
        request.source, request.crop.width, request.crop.height, request.crop.x, request.crop.y
    );
    if let Some(vendor) = request.hw_vendor {
        info!("Hardware path: {}", vendor);
    }
    info!("Commands: [p]ause, [r]esume, [c]ancel");

    let bar = ProgressBar::new(BAR_SCALE);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {wide_bar:.cyan/blue} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    // Progress and error display
    let (done_tx, done_rx) = bounded::<()>(1);
    let progress_rx = controller.subscribe_progress();
    let error_rx = controller.subscribe_errors();
    let display = {
        let bar = bar.clone();
        let controller = controller.clone();
        thread::spawn(move || loop {
            select! {
                recv(progress_rx) -> msg => match msg {
                    Ok(sample) => {
                        bar.set_position((sample.fraction * BAR_SCALE as f64).round() as u64);
                        bar.set_message(sample.text);
                    }
                    Err(_) => break,
                },
                recv(error_rx) -> msg => {
                    if let Ok(message) = msg {
                        bar.println(format!("error: {message}"));
                        if controller.state() == JobState::Paused {
                            bar.println("the encoder is suspended; type c to cancel or r to let it finish");
                        }
                    }
                },
                recv(done_rx) -> _ => break,
            }
        })
    };

    // Interactive commands. A plain thread so a pending stdin read never holds up shutdown.
    {
        let controller = controller.clone();
        thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let result = match line.trim().to_ascii_lowercase().as_str() {
                    "" => Ok(()),
                    "p" | "pause" => controller.pause(),
                    "r" | "resume" => controller.resume(),
                    "c" | "cancel" | "q" => controller.cancel(),
                    other => {
                        warn!("Unknown command '{}' (pause, resume, cancel)", other);
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("{}", e);
                }
            }
        });
    }

    {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted; cancelling");
                match tokio::task::spawn_blocking(move || controller.cancel()).await {
                    Ok(Err(e)) => warn!("{}", e),
                    Err(e) => warn!("cancel task failed: {}", e),
                    Ok(Ok(())) => {}
                }
            }
        });
    }

    let runner = controller.clone();
    let outcome = tokio::task::spawn_blocking(move || runner.start(&request))
        .await
        .context("transcode task panicked")??;

    let _ = done_tx.send(());
    let _ = display.join();

    match outcome {
        Outcome::Success(path) => {
            bar.finish_with_message("100 %");
            info!("Cropped video written to {}", path.display());
            Ok(())
        }
        Outcome::Cancelled => {
            bar.abandon_with_message("cancelled");
            info!("Cancelled; partial output removed");
            Ok(())
        }
        Outcome::Failed(message) => {
            bar.abandon_with_message("failed");
            Err(anyhow!(message))
        }
    }
}
