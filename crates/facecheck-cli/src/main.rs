use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{
    is_valid_threshold, ImageInput, OnnxEmbeddingEngine, Verifier, DEFAULT_MATCH_THRESHOLD,
};
use std::path::PathBuf;

// `#[zbus::proxy]` generates `FaceCheckProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.facecheck.FaceCheck1",
    default_service = "org.facecheck.FaceCheck1",
    default_path = "/org/facecheck/FaceCheck1"
)]
trait FaceCheck {
    async fn select_reference(&self, image: &[u8]) -> zbus::Result<String>;
    async fn start_camera(&self) -> zbus::Result<String>;
    async fn stop_camera(&self) -> zbus::Result<()>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn verify(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facecheck", about = "Verify a live face against a reference photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload the reference photo to the daemon
    Reference {
        /// Image file (PNG, JPEG, ...)
        path: PathBuf,
    },
    /// Turn the camera on
    Start,
    /// Turn the camera off
    Stop,
    /// Take a live snapshot
    Capture,
    /// Compare the reference photo with the last snapshot
    Verify,
    /// Show daemon status
    Status,
    /// Compare two image files locally, without the daemon
    Compare {
        reference: PathBuf,
        probe: PathBuf,
        /// Directory containing det_10g.onnx and w600k_r50.onnx
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Maximum embedding distance counted as a match
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD, value_parser = parse_threshold)]
        threshold: f32,
    },
    /// List V4L2 capture devices
    Devices,
}

fn parse_threshold(raw: &str) -> Result<f32, String> {
    let threshold: f32 = raw.parse().map_err(|e| format!("{e}"))?;
    if !is_valid_threshold(threshold) {
        return Err(format!("threshold must be a finite number above 0, got {raw}"));
    }
    Ok(threshold)
}

/// Print the daemon's JSON reply, surfacing the human-readable message if present.
fn print_reply(reply: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(reply).context("daemon sent invalid JSON")?;
    if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
        println!("{message}");
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn proxy() -> Result<FaceCheckProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    FaceCheckProxy::new(&conn)
        .await
        .context("facecheckd is not reachable")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reference { path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            print_reply(&proxy().await?.select_reference(&bytes).await?)?;
        }
        Commands::Start => {
            print_reply(&proxy().await?.start_camera().await?)?;
        }
        Commands::Stop => {
            proxy().await?.stop_camera().await?;
            println!("Camera stopped");
        }
        Commands::Capture => {
            print_reply(&proxy().await?.capture().await?)?;
        }
        Commands::Verify => {
            println!("Verifying face...");
            print_reply(&proxy().await?.verify().await?)?;
        }
        Commands::Status => {
            print_reply(&proxy().await?.status().await?)?;
        }
        Commands::Compare {
            reference,
            probe,
            model_dir,
            threshold,
        } => {
            let model_dir = model_dir.unwrap_or_else(facecheck_core::default_model_dir);
            let engine = OnnxEmbeddingEngine::initialize(&model_dir)
                .with_context(|| format!("failed to load models from {}", model_dir.display()))?;
            let mut verifier = Verifier::new(engine, threshold);

            let result = verifier.verify(
                Some(&ImageInput::File(reference)),
                Some(&ImageInput::File(probe)),
            );
            println!("{}", result.status_message());
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Devices => {
            let devices = facecheck_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compare_with_threshold(threshold: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(["facecheck", "compare", "a.png", "b.png", "--threshold", threshold])
    }

    #[test]
    fn test_compare_default_threshold() {
        let cli = Cli::try_parse_from(["facecheck", "compare", "a.png", "b.png"]).unwrap();
        match cli.command {
            Commands::Compare { threshold, .. } => assert_eq!(threshold, DEFAULT_MATCH_THRESHOLD),
            _ => panic!("expected compare"),
        }
    }

    #[test]
    fn test_compare_accepts_positive_threshold() {
        assert!(compare_with_threshold("0.5").is_ok());
    }

    #[test]
    fn test_compare_rejects_unusable_threshold() {
        for raw in ["NaN", "inf", "0", "-0.6", "abc"] {
            assert!(compare_with_threshold(raw).is_err(), "{raw}");
        }
    }
}
