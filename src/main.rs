use anyhow::{Context, Result};
use clap::Parser;
use heartbeat_decoder::config::{Args, PipelineConfig};
use heartbeat_decoder::{data_loading, output, process, HeartBeat};
use log::{debug, info};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

fn batch_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("batch")
        .to_string()
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    let config = PipelineConfig::from(&args);
    config.validate().context("Invalid pipeline configuration")?;
    debug!("Pipeline config: {}", serde_json::to_string(&config)?);

    let files = data_loading::collect_input_files(&args.input_path)?;
    let mut results: Vec<HeartBeat> = Vec::with_capacity(files.len());

    for path in &files {
        info!("Loading file: {}", path.display());
        let readings = data_loading::load_readings(path, args.csv_input)?;

        let analysis = process(&readings, &config)
            .with_context(|| format!("Failed to analyze {}", path.display()))?;

        info!(
            "{}: {:.2} BPM from {} peaks ({} outliers replaced)",
            path.display(),
            analysis.heart_beat.bpm,
            analysis.peaks.len(),
            analysis.outliers_replaced
        );
        if let Some(prefix) = &args.csv_output {
            output::write_smoothed_csv(prefix, &batch_name(path), &analysis, config.frame_rate)?;
        }

        results.push(analysis.heart_beat);
    }

    // A single input keeps the plain result shape, several become an array
    let write = |writer: &mut dyn io::Write| -> Result<()> {
        if let [single] = results.as_slice() {
            output::write_result_json(writer, single)
        } else {
            serde_json::to_writer_pretty(&mut *writer, &results)?;
            writeln!(writer)?;
            Ok(())
        }
    };

    match &args.output {
        Some(path) => {
            info!("Writing results to {}", path.display());
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
        }
        None => write(&mut io::stdout().lock())?,
    }

    Ok(())
}
