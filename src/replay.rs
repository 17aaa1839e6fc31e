//! Power sample sources
//!
//! The engine is fed one sample at a time from a [`SampleSource`]. The CSV
//! reader replays a recorded ride; [`VecSource`] serves samples held in memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::error::{ImportError, Result};
use crate::models::{PowerSample, Timestamp, Watts};

/// Supplier of samples in delivery order
pub trait SampleSource {
    /// Next sample, `None` when the source is exhausted
    fn next_sample(&mut self) -> Option<Result<PowerSample>>;
}

/// Samples held in memory
#[derive(Debug, Clone)]
pub struct VecSource {
    samples: std::vec::IntoIter<PowerSample>,
}

impl VecSource {
    pub fn new(samples: Vec<PowerSample>) -> Self {
        VecSource {
            samples: samples.into_iter(),
        }
    }

    /// Constant-power blocks at 1 Hz starting at `start`
    pub fn from_blocks(start: Timestamp, blocks: &[(Watts, u64)]) -> Self {
        let mut samples = Vec::new();
        let mut now = start;
        for &(power, seconds) in blocks {
            for _ in 0..seconds {
                now += 1000;
                samples.push(PowerSample::new(power, now));
            }
        }
        VecSource::new(samples)
    }
}

impl SampleSource for VecSource {
    fn next_sample(&mut self) -> Option<Result<PowerSample>> {
        self.samples.next().map(Ok)
    }
}

/// CSV ride reader with flexible column names
pub struct CsvSampleReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    timestamp_column: usize,
    power_column: usize,
    row: usize,
}

/// Column aliases: canonical name to accepted header spellings
fn column_aliases() -> HashMap<&'static str, &'static [&'static str]> {
    let mut aliases: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    aliases.insert(
        "timestamp",
        &["timestamp", "time", "elapsed", "secs", "seconds"],
    );
    aliases.insert("power", &["power", "watts", "power_watts"]);
    aliases
}

fn find_column(headers: &StringRecord, canonical: &str) -> std::result::Result<usize, ImportError> {
    let aliases = column_aliases();
    let candidates = aliases.get(canonical).copied().unwrap_or(&[]);

    headers
        .iter()
        .position(|header| {
            let header = header.trim().to_lowercase();
            candidates.iter().any(|alias| *alias == header)
        })
        .ok_or_else(|| ImportError::MissingColumn {
            column: canonical.to_string(),
        })
}

impl CsvSampleReader<File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Opened ride file");
        Self::from_reader(file)
    }
}

impl<R: Read> CsvSampleReader<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers().map_err(ImportError::from)?.clone();
        let timestamp_column = find_column(&headers, "timestamp")?;
        let power_column = find_column(&headers, "power")?;

        Ok(CsvSampleReader {
            records: reader.into_records(),
            timestamp_column,
            power_column,
            row: 1,
        })
    }

    fn parse_record(&self, record: &StringRecord) -> std::result::Result<PowerSample, ImportError> {
        let raw_timestamp = record.get(self.timestamp_column).unwrap_or("");
        let seconds: f64 = raw_timestamp
            .parse()
            .ok()
            .filter(|secs: &f64| secs.is_finite() && *secs >= 0.0)
            .ok_or_else(|| ImportError::InvalidRow {
                row: self.row,
                reason: format!("invalid timestamp '{}'", raw_timestamp),
            })?;
        let timestamp = (seconds * 1000.0).round() as Timestamp;

        let raw_power = record.get(self.power_column).unwrap_or("");
        let power = if raw_power.is_empty() {
            None
        } else {
            match raw_power.parse::<Watts>() {
                Ok(power) => Some(power),
                Err(_) => {
                    warn!(row = self.row, value = raw_power, "Unreadable power value, treating as missing");
                    None
                }
            }
        };

        Ok(PowerSample { power, timestamp })
    }

    /// Read every remaining sample
    pub fn read_all(mut self) -> Result<Vec<PowerSample>> {
        let mut samples = Vec::new();
        while let Some(sample) = self.next_sample() {
            samples.push(sample?);
        }
        Ok(samples)
    }
}

impl<R: Read> SampleSource for CsvSampleReader<R> {
    fn next_sample(&mut self) -> Option<Result<PowerSample>> {
        let record = self.records.next()?;
        self.row += 1;

        Some(
            record
                .map_err(ImportError::from)
                .and_then(|record| self.parse_record(&record))
                .map_err(Into::into),
        )
    }
}
