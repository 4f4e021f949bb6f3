//! Append-only record of applied guide corrections.
//!
//! One line per correction:
//! `[<UTC timestamp>] <reference>\t<check>\t<dx>\t<dy>`, offsets to two
//! decimal places.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One applied (or simulated) correction
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// Reference image file name
    pub reference: String,
    /// Check image file name
    pub check: String,
    pub dx: f64,
    pub dy: f64,
}

impl LogRecord {
    /// Render the record as one log line, newline included
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}\t{}\t{:.2}\t{:.2}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.reference,
            self.check,
            self.dx,
            self.dy
        )
    }

    /// Parse a line written by [`LogRecord::to_line`]
    ///
    /// Offsets come back at the two-decimal precision they were written with.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let rest = line.strip_prefix('[')?;
        let (timestamp, rest) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();

        let mut fields = rest.split('\t');
        let reference = fields.next()?.to_string();
        let check = fields.next()?.to_string();
        let dx = fields.next()?.parse().ok()?;
        let dy = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }

        Some(Self {
            timestamp,
            reference,
            check,
            dx,
            dy,
        })
    }
}

/// Writer for the shift log
///
/// The file is opened, appended to and closed on every call so nothing is held
/// open across a night.
#[derive(Debug, Clone)]
pub struct ShiftLogger {
    path: PathBuf,
}

impl ShiftLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(record.to_line().as_bytes())
    }

    /// Every well-formed record currently in the log
    pub fn read_records(&self) -> std::io::Result<Vec<LogRecord>> {
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(contents.lines().filter_map(LogRecord::parse_line).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(dx: f64, dy: f64) -> LogRecord {
        LogRecord {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 10)
                .unwrap()
                .and_hms_micro_opt(3, 4, 5, 123456)
                .unwrap()
                .and_utc(),
            reference: "fieldA-001.fits".to_string(),
            check: "fieldA-002.fits".to_string(),
            dx,
            dy,
        }
    }

    #[test]
    fn test_line_format() {
        assert_eq!(
            record(3.14159, -2.0).to_line(),
            "[2024-03-10T03:04:05.123456] fieldA-001.fits\tfieldA-002.fits\t3.14\t-2.00\n"
        );
    }

    #[test]
    fn test_rounding_is_to_nearest_on_binary_value() {
        // 2.675 is stored as 2.67499999..., 0.666 rounds up, -0.004 keeps its sign
        let line = record(2.675, 0.666).to_line();
        assert!(line.ends_with("\t2.67\t0.67\n"), "{line}");
        let line = record(-0.004, 9.999).to_line();
        assert!(line.ends_with("\t-0.00\t10.00\n"), "{line}");
    }

    #[test]
    fn test_parse_back_is_two_decimal() {
        let parsed = LogRecord::parse_line(&record(3.14159, -2.0).to_line()).unwrap();
        assert_eq!(parsed.dx, 3.14);
        assert_eq!(parsed.dy, -2.00);
        assert_eq!(parsed.reference, "fieldA-001.fits");
        assert_eq!(parsed.check, "fieldA-002.fits");
        assert_eq!(parsed.timestamp, record(0.0, 0.0).timestamp);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(LogRecord::parse_line("").is_none());
        assert!(LogRecord::parse_line("fieldA-001.fits\tfieldA-002.fits\t1.00\t2.00").is_none());
        assert!(LogRecord::parse_line("[yesterday] a\tb\t1.00\t2.00").is_none());
        assert!(
            LogRecord::parse_line("[2024-03-10T03:04:05.123456] a\tb\t1.00").is_none()
        );
    }

    #[test]
    fn test_append_accumulates_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ShiftLogger::new(dir.path().join("guider.log"));

        logger.append(&record(1.0, 2.0)).unwrap();
        logger.append(&record(-3.0, 4.5)).unwrap();

        let records = logger.read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[1].dx, records[1].dy), (-3.0, 4.5));

        let raw = std::fs::read_to_string(logger.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn test_append_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let logger = ShiftLogger::new(dir.path().join("missing").join("guider.log"));
        assert!(logger.append(&record(1.0, 2.0)).is_err());
    }
}
