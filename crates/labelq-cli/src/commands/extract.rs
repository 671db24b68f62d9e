//! Extract command - run text extraction on one document.

use std::path::PathBuf;

use clap::Args;
use console::style;

use labelq_core::TextExtractor;

use super::load_config;

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Document file
    path: PathBuf,

    /// Use embedded text only, never OCR
    #[arg(long)]
    no_ocr: bool,

    /// Print text, source and diagnostics as JSON
    #[arg(long)]
    json: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if args.no_ocr {
        config.ocr.enabled = false;
    }

    let extractor = TextExtractor::from_config(&config.ocr)?;
    let path = args.path.clone();
    let extraction = tokio::task::spawn_blocking(move || extractor.extract(&path)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&extraction)?);
        return Ok(());
    }

    for diagnostic in &extraction.diagnostics {
        eprintln!("{} {}", style("⚠").yellow(), diagnostic);
    }
    if extraction.is_empty() {
        anyhow::bail!("No text could be extracted from {}", args.path.display());
    }

    eprintln!(
        "{} {} characters of {} text",
        style("ℹ").blue(),
        extraction.text.chars().count(),
        extraction.source
    );
    println!("{}", extraction.text);
    Ok(())
}
