//! Attendance ledger: per-day, per-identity presence table.
//!
//! CSV on disk, header `date,<name>,...`, one row per ISO calendar date,
//! cells 0/1. Every accepted mark rewrites the whole file; the scale is
//! interactive and single-process, so that is fine. A transient last-seen
//! table suppresses repeat marks inside the cooldown window and is
//! deliberately not persisted: restarting the process allows an immediate
//! re-mark.

use chrono::{DateTime, Local, NaiveDate, TimeDelta};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default minimum seconds between two accepted marks for one identity.
pub const DEFAULT_COOLDOWN_SECS: i64 = 3600;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ledger file {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },
    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Whether a mark request changed the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    /// Inside the cooldown window; no I/O performed.
    Suppressed,
}

/// Attendance table plus the in-memory cooldown state.
pub struct AttendanceLedger {
    path: PathBuf,
    columns: Vec<String>,
    rows: BTreeMap<NaiveDate, Vec<u8>>,
    last_seen: HashMap<String, DateTime<Local>>,
    cooldown: TimeDelta,
}

impl AttendanceLedger {
    /// Load the ledger from disk; a missing file yields an empty table.
    pub fn load(path: impl Into<PathBuf>, cooldown_secs: i64) -> Result<Self, LedgerError> {
        let path = path.into();
        let cooldown = TimeDelta::seconds(cooldown_secs);

        if !path.exists() {
            tracing::info!(path = %path.display(), "no ledger file; starting empty");
            return Ok(Self {
                path,
                columns: Vec::new(),
                rows: BTreeMap::new(),
                last_seen: HashMap::new(),
                cooldown,
            });
        }

        let mut reader = csv::Reader::from_path(&path).map_err(|source| LedgerError::Csv {
            path: path.clone(),
            source,
        })?;

        let headers = reader
            .headers()
            .map_err(|source| LedgerError::Csv {
                path: path.clone(),
                source,
            })?
            .clone();
        let mut header_iter = headers.iter();
        match header_iter.next() {
            Some("date") => {}
            other => {
                return Err(LedgerError::Malformed {
                    path,
                    detail: format!("first header must be 'date', got {other:?}"),
                })
            }
        }
        let columns: Vec<String> = header_iter.map(str::to_string).collect();

        let mut rows = BTreeMap::new();
        for record in reader.records() {
            let record = record.map_err(|source| LedgerError::Csv {
                path: path.clone(),
                source,
            })?;
            let mut fields = record.iter();
            let date_field = fields.next().unwrap_or_default();
            let date = NaiveDate::parse_from_str(date_field, "%Y-%m-%d").map_err(|e| {
                LedgerError::Malformed {
                    path: path.clone(),
                    detail: format!("bad date '{date_field}': {e}"),
                }
            })?;

            let cells = fields
                .map(|cell| match cell {
                    "0" => Ok(0u8),
                    "1" => Ok(1u8),
                    other => Err(LedgerError::Malformed {
                        path: path.clone(),
                        detail: format!("bad cell '{other}' in row {date}"),
                    }),
                })
                .collect::<Result<Vec<u8>, _>>()?;

            if cells.len() != columns.len() {
                return Err(LedgerError::Malformed {
                    path: path.clone(),
                    detail: format!(
                        "row {date} has {} cells for {} columns",
                        cells.len(),
                        columns.len()
                    ),
                });
            }
            rows.insert(date, cells);
        }

        tracing::info!(
            path = %path.display(),
            identities = columns.len(),
            days = rows.len(),
            "ledger loaded"
        );

        Ok(Self {
            path,
            columns,
            rows,
            last_seen: HashMap::new(),
            cooldown,
        })
    }

    /// Record attendance for `name` at `when`.
    ///
    /// Suppressed without touching disk when the identity was already marked
    /// inside the cooldown window. Otherwise the day's row is created on
    /// demand (all zeros across existing columns), the identity's column is
    /// created on demand (backfilled with zeros), the cell is set to 1, and
    /// the whole table is written back.
    pub fn mark(&mut self, name: &str, when: DateTime<Local>) -> Result<MarkOutcome, LedgerError> {
        if let Some(last) = self.last_seen.get(name) {
            if when.signed_duration_since(*last) < self.cooldown {
                tracing::debug!(name, "mark suppressed inside cooldown window");
                return Ok(MarkOutcome::Suppressed);
            }
        }

        let column = self.ensure_column(name);
        let width = self.columns.len();
        let row = self
            .rows
            .entry(when.date_naive())
            .or_insert_with(|| vec![0u8; width]);
        if row.len() < width {
            row.resize(width, 0);
        }
        row[column] = 1;

        self.save()?;
        self.last_seen.insert(name.to_string(), when);
        tracing::info!(name, time = %when.format("%H:%M:%S"), "attendance marked");
        Ok(MarkOutcome::Marked)
    }

    /// Cell value for a given day and identity, if both exist.
    pub fn cell(&self, date: NaiveDate, name: &str) -> Option<u8> {
        let col = self.columns.iter().position(|c| c == name)?;
        self.rows.get(&date).map(|row| row.get(col).copied().unwrap_or(0))
    }

    /// Identity columns in ledger order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of day rows.
    pub fn days(&self) -> usize {
        self.rows.len()
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        match self.columns.iter().position(|c| c == name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                let width = self.columns.len();
                for row in self.rows.values_mut() {
                    row.resize(width, 0);
                }
                width - 1
            }
        }
    }

    fn save(&self) -> Result<(), LedgerError> {
        let mut writer = csv::Writer::from_path(&self.path).map_err(|source| LedgerError::Csv {
            path: self.path.clone(),
            source,
        })?;

        let mut header = Vec::with_capacity(self.columns.len() + 1);
        header.push("date".to_string());
        header.extend(self.columns.iter().cloned());
        write_record(&mut writer, &self.path, &header)?;

        for (date, cells) in &self.rows {
            let mut record = Vec::with_capacity(cells.len() + 1);
            record.push(date.format("%Y-%m-%d").to_string());
            record.extend(cells.iter().map(u8::to_string));
            write_record(&mut writer, &self.path, &record)?;
        }

        writer.flush().map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_record(
    writer: &mut csv::Writer<std::fs::File>,
    path: &Path,
    record: &[String],
) -> Result<(), LedgerError> {
    writer.write_record(record).map_err(|source| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_ledger(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rollcall-ledger-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("attendance.csv")
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 5, h, m, s).unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let ledger = AttendanceLedger::load(temp_ledger("missing"), DEFAULT_COOLDOWN_SECS).unwrap();
        assert!(ledger.columns().is_empty());
        assert_eq!(ledger.days(), 0);
    }

    #[test]
    fn test_first_mark_creates_row_and_column() {
        let path = temp_ledger("first");
        let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();

        let when = at(9, 0, 0);
        assert_eq!(ledger.mark("Alice", when).unwrap(), MarkOutcome::Marked);
        assert_eq!(ledger.cell(when.date_naive(), "Alice"), Some(1));
        assert!(path.exists());
    }

    #[test]
    fn test_mark_inside_cooldown_suppressed() {
        let path = temp_ledger("cooldown");
        let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();

        assert_eq!(ledger.mark("Alice", at(9, 0, 0)).unwrap(), MarkOutcome::Marked);
        // 59 minutes 59 seconds later: still inside the window.
        assert_eq!(
            ledger.mark("Alice", at(9, 59, 59)).unwrap(),
            MarkOutcome::Suppressed
        );
        assert_eq!(ledger.cell(at(9, 0, 0).date_naive(), "Alice"), Some(1));
    }

    #[test]
    fn test_mark_after_cooldown_is_idempotent_on_cell() {
        let path = temp_ledger("idempotent");
        let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();

        assert_eq!(ledger.mark("Alice", at(9, 0, 0)).unwrap(), MarkOutcome::Marked);
        // Exactly one hour later: accepted again, cell stays 1.
        assert_eq!(ledger.mark("Alice", at(10, 0, 0)).unwrap(), MarkOutcome::Marked);
        assert_eq!(ledger.cell(at(9, 0, 0).date_naive(), "Alice"), Some(1));
        assert_eq!(ledger.days(), 1);
    }

    #[test]
    fn test_cooldown_is_per_identity() {
        let path = temp_ledger("peridentity");
        let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();

        assert_eq!(ledger.mark("Alice", at(9, 0, 0)).unwrap(), MarkOutcome::Marked);
        assert_eq!(ledger.mark("Bob", at(9, 0, 30)).unwrap(), MarkOutcome::Marked);
    }

    #[test]
    fn test_new_day_row_zeroed_for_existing_columns() {
        let path = temp_ledger("newday");
        let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();

        let day1 = at(9, 0, 0);
        ledger.mark("Alice", day1).unwrap();
        ledger.mark("Bob", at(9, 5, 0)).unwrap();

        let day2 = Local.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap();
        ledger.mark("Alice", day2).unwrap();

        // Day 2 exists with Bob defaulted to 0.
        assert_eq!(ledger.cell(day2.date_naive(), "Alice"), Some(1));
        assert_eq!(ledger.cell(day2.date_naive(), "Bob"), Some(0));
        // Day 1 untouched.
        assert_eq!(ledger.cell(day1.date_naive(), "Bob"), Some(1));
    }

    #[test]
    fn test_new_column_backfills_existing_rows() {
        let path = temp_ledger("backfill");
        let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();

        let day1 = at(9, 0, 0);
        ledger.mark("Alice", day1).unwrap();

        let day2 = Local.with_ymd_and_hms(2026, 8, 6, 9, 0, 0).unwrap();
        ledger.mark("Carol", day2).unwrap();

        // Carol's column exists on day 1 as 0.
        assert_eq!(ledger.cell(day1.date_naive(), "Carol"), Some(0));
        assert_eq!(ledger.cell(day2.date_naive(), "Carol"), Some(1));
    }

    #[test]
    fn test_roundtrip_through_file() {
        let path = temp_ledger("roundtrip");
        {
            let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();
            ledger.mark("Alice", at(9, 0, 0)).unwrap();
            ledger.mark("Bob", at(9, 1, 0)).unwrap();
        }

        let reloaded = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();
        assert_eq!(reloaded.columns(), &["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(reloaded.cell(at(9, 0, 0).date_naive(), "Alice"), Some(1));
        assert_eq!(reloaded.cell(at(9, 0, 0).date_naive(), "Bob"), Some(1));
    }

    #[test]
    fn test_restart_clears_cooldown() {
        let path = temp_ledger("restart");
        {
            let mut ledger = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();
            ledger.mark("Alice", at(9, 0, 0)).unwrap();
        }

        // Fresh process: the last-seen table is gone, so a mark one minute
        // later is accepted.
        let mut reloaded = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS).unwrap();
        assert_eq!(reloaded.mark("Alice", at(9, 1, 0)).unwrap(), MarkOutcome::Marked);
    }

    #[test]
    fn test_malformed_header_is_error() {
        let path = temp_ledger("badheader");
        std::fs::write(&path, "day,Alice\n2026-08-05,1\n").unwrap();
        let result = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS);
        assert!(matches!(result, Err(LedgerError::Malformed { .. })));
    }

    #[test]
    fn test_malformed_cell_is_error() {
        let path = temp_ledger("badcell");
        std::fs::write(&path, "date,Alice\n2026-08-05,present\n").unwrap();
        let result = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS);
        assert!(matches!(result, Err(LedgerError::Malformed { .. })));
    }

    #[test]
    fn test_malformed_date_is_error() {
        let path = temp_ledger("baddate");
        std::fs::write(&path, "date,Alice\nyesterday,1\n").unwrap();
        let result = AttendanceLedger::load(&path, DEFAULT_COOLDOWN_SECS);
        assert!(matches!(result, Err(LedgerError::Malformed { .. })));
    }

    #[test]
    fn test_zero_cooldown_accepts_back_to_back() {
        let path = temp_ledger("zerocooldown");
        let mut ledger = AttendanceLedger::load(&path, 0).unwrap();
        assert_eq!(ledger.mark("Alice", at(9, 0, 0)).unwrap(), MarkOutcome::Marked);
        assert_eq!(ledger.mark("Alice", at(9, 0, 1)).unwrap(), MarkOutcome::Marked);
    }
}
