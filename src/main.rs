//! Geo-mapper stage
//!
//! Reads detection messages as JSON lines, writes a geo-coordinate onto every
//! detection and forwards the messages as JSON lines.
//!
//! Usage:
//! ```bash
//! cargo run --release -- \
//!   --config samples/geomapper.yaml \
//!   --input detections.jsonl \
//!   --output mapped.jsonl \
//!   --csv mapped.csv
//! ```

use clap::Parser;
use geomapper::config::GeoMapperConfig;
use geomapper::pipeline::{DetectionMapper, MappingReport, Outcome, SaeMessage};
use log::{info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

/// Maps pixel detections to geographic coordinates
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the stage configuration
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// JSON-lines input, stdin when omitted
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// JSON-lines output, stdout when omitted
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Optional CSV export of the mapped detections
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    source_id: &'a str,
    timestamp_utc_ms: i64,
    index: usize,
    class_id: i64,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Default)]
struct Summary {
    forwarded: usize,
    dropped: usize,
    malformed: usize,
    detections: MappingReport,
}

fn write_csv_rows<W: Write>(
    csv: &mut csv::Writer<W>,
    message: &SaeMessage,
) -> Result<(), csv::Error> {
    for (index, detection) in message.detections.iter().enumerate() {
        if let Some(geo) = detection.geo_coordinate {
            csv.serialize(CsvRow {
                source_id: &message.frame.source_id,
                timestamp_utc_ms: message.frame.timestamp_utc_ms,
                index,
                class_id: detection.class_id,
                latitude: geo.latitude,
                longitude: geo.longitude,
            })?;
        }
    }
    Ok(())
}

fn stream_list(mapper: &DetectionMapper) -> String {
    let mut ids: Vec<_> = mapper.stream_ids().collect();
    ids.sort_unstable();
    ids.join(", ")
}

fn run<R: BufRead, W: Write>(
    mapper: &DetectionMapper,
    reader: R,
    mut writer: W,
    mut csv: Option<csv::Writer<File>>,
) -> Result<Summary, Box<dyn std::error::Error>> {
    let mut summary = Summary::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message: SaeMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!("Skipping malformed message on line {}: {}", line_no + 1, err);
                summary.malformed += 1;
                continue;
            }
        };

        match mapper.process(message) {
            Outcome::Forwarded(message, report) => {
                summary.forwarded += 1;
                summary.detections.merge(&report);
                if let Some(csv) = csv.as_mut() {
                    write_csv_rows(csv, &message)?;
                }
                serde_json::to_writer(&mut writer, &message)?;
                writer.write_all(b"\n")?;
            }
            Outcome::Dropped(_) => summary.dropped += 1,
        }
    }

    writer.flush()?;
    if let Some(mut csv) = csv {
        csv.flush()?;
    }
    Ok(summary)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = GeoMapperConfig::load(&cli.config)?;
    // RUST_LOG takes precedence over the configured level
    env_logger::Builder::new()
        .filter_level(config.log_level_filter()?)
        .parse_default_env()
        .init();

    let mapper = DetectionMapper::from_config(&config)?;
    info!(
        "Loaded camera streams [{}] from {}, anchor {:?}",
        stream_list(&mapper),
        cli.config.display(),
        mapper.anchor()
    );

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin().lock())),
    };
    let writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let csv = cli.csv.as_ref().map(csv::Writer::from_path).transpose()?;

    let summary = run(&mapper, reader, writer, csv)?;
    info!(
        "Messages: {} forwarded, {} dropped, {} malformed",
        summary.forwarded, summary.dropped, summary.malformed
    );
    info!(
        "Detections: {} mapped, {} unmapped ({} removed), {} with non-converged undistortion",
        summary.detections.mapped,
        summary.detections.unmapped,
        summary.detections.removed,
        summary.detections.non_converged
    );
    Ok(())
}
