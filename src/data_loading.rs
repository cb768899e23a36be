use crate::{Attachments, Reading};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Request body shape: `{"data": [{"value": ..., ...}, ...]}`.
#[derive(Debug, Deserialize)]
struct RequestBody {
    data: Option<Vec<Reading>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReadingsDocument {
    Body(RequestBody),
    Bare(Vec<Reading>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Some(InputFormat::Json),
            Some("csv") => Some(InputFormat::Csv),
            _ => None,
        }
    }
}

/// Parse readings from JSON, either the request body form or a bare array.
pub fn parse_json_readings<R: Read>(reader: R) -> Result<Vec<Reading>> {
    let document: ReadingsDocument =
        serde_json::from_reader(reader).context("Failed to parse readings JSON")?;

    let readings = match document {
        ReadingsDocument::Body(body) => body.data.unwrap_or_default(),
        ReadingsDocument::Bare(readings) => readings,
    };

    if readings.is_empty() {
        bail!("No data provided");
    }
    Ok(readings)
}

/// Parse readings from CSV with a `value` column. Other columns become
/// payload fields, as numbers when they parse as such.
pub fn parse_csv_readings<R: Read>(reader: R) -> Result<Vec<Reading>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers().context("Failed to read CSV header")?.clone();

    let value_idx = headers
        .iter()
        .position(|h| h.trim() == "value")
        .context("CSV input has no 'value' column")?;

    let mut readings = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV row {}", row + 1))?;

        let raw_value = record
            .get(value_idx)
            .with_context(|| format!("CSV row {} has no value", row + 1))?;
        let value: f64 = raw_value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value '{}' in CSV row {}", raw_value, row + 1))?;

        let mut payload = Attachments::new();
        for (idx, (header, field)) in headers.iter().zip(record.iter()).enumerate() {
            if idx == value_idx {
                continue;
            }
            let field = field.trim();
            let field_value = match field.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                Some(number) => Value::Number(number),
                None => Value::String(field.to_string()),
            };
            payload.insert(header.trim().to_string(), field_value);
        }

        readings.push(Reading { value, payload });
    }

    if readings.is_empty() {
        bail!("No data provided");
    }
    Ok(readings)
}

/// Load one batch of readings. `force_csv` overrides the extension.
pub fn load_readings(path: &Path, force_csv: bool) -> Result<Vec<Reading>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let format = if force_csv {
        InputFormat::Csv
    } else {
        InputFormat::from_path(path).unwrap_or(InputFormat::Json)
    };

    let readings = match format {
        InputFormat::Json => parse_json_readings(reader),
        InputFormat::Csv => parse_csv_readings(reader),
    };
    readings.with_context(|| format!("Failed to load readings from {}", path.display()))
}

/// A file is returned as is; a directory is walked for `.json`/`.csv` files,
/// sorted by path.
pub fn collect_input_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("Input path {} does not exist", path.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() && InputFormat::from_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    files.sort();

    if files.is_empty() {
        bail!("No .json or .csv files found in {}", path.display());
    }
    Ok(files)
}
