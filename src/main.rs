use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use diagram_crop::{DiagramPipeline, settings};

#[derive(Parser, Debug)]
#[command(
    name = "diagram-crop",
    version,
    about = "Locate and clean up the diagram in a photographed math problem"
)]
struct Cli {
    /// Problem image (JPEG/PNG)
    image: PathBuf,

    /// Write the cleaned PNG here instead of printing a data URI
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    diagram_crop::logging::init(cli.verbose)?;

    let settings = settings::load_settings(cli.read_settings.as_deref())?;
    let pipeline = DiagramPipeline::from_settings(&settings)?;

    let Some(cleaned) = pipeline.detect_and_enhance(&cli.image).await else {
        eprintln!("no diagram found");
        return Ok(());
    };

    match cli.output {
        Some(path) => {
            std::fs::write(&path, &cleaned.png)
                .with_context(|| format!("failed to write output: {}", path.display()))?;
            eprintln!(
                "wrote {} (via {})",
                path.display(),
                cleaned.layer.as_str()
            );
        }
        None => println!("{}", cleaned.data_uri()),
    }
    Ok(())
}
