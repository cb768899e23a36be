use crate::{Analysis, HeartBeat};
use anyhow::{Context, Result};
use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Serialize the result as pretty JSON in the `{bpm, dataStats, smoothedData}` shape.
pub fn write_result_json<W: Write>(mut writer: W, heart_beat: &HeartBeat) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, heart_beat)
        .context("Failed to serialize heart beat result")?;
    writeln!(writer)?;
    Ok(())
}

/// Write the smoothed series for charting to `<prefix>_<batch_name>.<ext>`.
/// Returns the path written.
pub fn write_smoothed_csv(
    base_path: &str,
    batch_name: &str,
    analysis: &Analysis,
    frame_rate: f64,
) -> Result<PathBuf> {
    let path = Path::new(base_path);
    let dir = path.parent().unwrap_or(Path::new("."));

    // Create directory if it doesn't exist
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("smoothed");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("csv");

    let filename = format!("{}_{}.{}", stem, batch_name, ext);
    let full_path = dir.join(filename);

    info!("Writing smoothed series to {}", full_path.display());
    let file = std::fs::File::create(&full_path)
        .with_context(|| format!("Failed to create {}", full_path.display()))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(["index", "time_s", "smoothed", "is_peak"])?;

    let mut peaks = analysis.peaks.iter().peekable();
    for (i, value) in analysis.heart_beat.smoothed_data.iter().enumerate() {
        let is_peak = peaks.next_if(|&&p| p == i).is_some();
        writer.write_record(&[
            i.to_string(),
            format!("{:.4}", i as f64 / frame_rate),
            value.to_string(),
            u8::from(is_peak).to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(full_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStats;

    fn sample_analysis() -> Analysis {
        Analysis {
            heart_beat: HeartBeat {
                bpm: 72.5,
                data_stats: DataStats { min: 0.25, max: 1.5 },
                smoothed_data: vec![0.25, 1.5, 0.5, 1.25],
            },
            peaks: vec![1, 3],
            interval_rates: vec![1800.0],
            outliers_replaced: 0,
            low_confidence: false,
        }
    }

    #[test]
    fn test_result_json_shape() {
        let mut buffer = Vec::new();
        write_result_json(&mut buffer, &sample_analysis().heart_beat).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json["bpm"], serde_json::json!(72.5));
        assert_eq!(json["dataStats"]["min"], serde_json::json!(0.25));
        assert_eq!(json["dataStats"]["max"], serde_json::json!(1.5));
        assert_eq!(json["smoothedData"].as_array().unwrap().len(), 4);
        assert!(json.get("smoothed_data").is_none());
    }

    #[test]
    fn test_smoothed_csv() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("out").join("series.csv");

        let path = write_smoothed_csv(
            prefix.to_str().unwrap(),
            "session1",
            &sample_analysis(),
            60.0,
        )
        .unwrap();
        assert_eq!(path, dir.path().join("out").join("series_session1.csv"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "index,time_s,smoothed,is_peak");
        assert_eq!(lines[1], "0,0.0000,0.25,0");
        assert_eq!(lines[2], "1,0.0167,1.5,1");
        assert_eq!(lines[4], "3,0.0500,1.25,1");
        assert_eq!(lines.len(), 5);
    }
}
