//! Recorded presence log.
//!
//! Live tracking appends every acquired snapshot here; batch replay reads the
//! snapshots back in file order.
//!
//! # Formats
//!
//! Both encodings carry the same flat record (see [`LogRecord`]):
//!
//! - `csv`: a header row followed by one row per snapshot.
//! - `json`: JSON Lines, one object per line. Blank lines are skipped.
//!
//! Timestamps are RFC 3339 in UTC (e.g. `2024-01-15T10:30:00Z`). The `online`
//! column accepts `true`/`false`, `True`/`False` and `1`/`0`.
//!
//! # Concurrency
//!
//! A log file is owned by one process at a time. Nothing here locks the file.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pt_core::{LastSeen, Platform, PresenceSnapshot, UserId, UserProfile};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Log errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Reading or writing the underlying file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A record could not be parsed; `position` is the 1-based line number.
    #[error("invalid record at line {position}: {message}")]
    Format { position: u64, message: String },
    /// Encoding a CSV record failed.
    #[error("failed to write CSV record: {0}")]
    Csv(#[from] csv::Error),
    /// Encoding a JSON record failed.
    #[error("failed to write JSON record: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk encoding of a recorded log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Csv,
    Json,
}

impl LogFormat {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "json" | "jsonl" => Ok(Self::Json),
            _ => Err(format!("invalid log format: {s} (expected csv or json)")),
        }
    }
}

/// One snapshot as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub observed_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub screen_name: Option<String>,
    #[serde(deserialize_with = "deserialize_online_flag")]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_seen_platform: Option<String>,
}

fn deserialize_online_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(u64),
        Text(String),
    }

    let invalid = |value: &dyn fmt::Display| {
        serde::de::Error::custom(format!("invalid online flag: {value}"))
    };

    match Flag::deserialize(deserializer)? {
        Flag::Bool(flag) => Ok(flag),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(n) => Err(invalid(&n)),
        Flag::Text(text) => match text.trim() {
            "true" | "True" | "1" => Ok(true),
            "false" | "False" | "0" => Ok(false),
            other => Err(invalid(&other)),
        },
    }
}

/// Empty strings in optional text columns mean "absent".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl LogRecord {
    pub fn from_snapshot(snapshot: &PresenceSnapshot) -> Self {
        Self {
            observed_at: snapshot.observed_at,
            user_id: snapshot.user_id.to_string(),
            first_name: snapshot.profile.first_name.clone(),
            last_name: snapshot.profile.last_name.clone(),
            screen_name: snapshot.profile.screen_name.clone(),
            online: snapshot.is_online,
            last_seen: snapshot.last_seen.map(|seen| seen.time),
            last_seen_platform: snapshot
                .last_seen
                .and_then(|seen| seen.platform)
                .map(|platform| platform.to_string()),
        }
    }

    /// Validates the record and converts it into a snapshot.
    pub fn into_snapshot(self) -> Result<PresenceSnapshot, String> {
        let user_id = UserId::new(self.user_id).map_err(|e| e.to_string())?;
        let platform = non_empty(self.last_seen_platform)
            .map(|p| p.parse::<Platform>())
            .transpose()
            .map_err(|e| e.to_string())?;
        if platform.is_some() && self.last_seen.is_none() {
            return Err("last_seen_platform given without last_seen".to_string());
        }

        let mut snapshot = PresenceSnapshot::new(user_id, self.observed_at, self.online)
            .with_profile(UserProfile {
                first_name: non_empty(self.first_name),
                last_name: non_empty(self.last_name),
                screen_name: non_empty(self.screen_name),
            });
        if let Some(time) = self.last_seen {
            snapshot = snapshot.with_last_seen(LastSeen { time, platform });
        }
        Ok(snapshot)
    }
}

enum ReaderInner {
    Csv {
        reader: csv::Reader<File>,
        headers: csv::StringRecord,
        record: csv::StringRecord,
    },
    Json {
        lines: io::Split<BufReader<File>>,
        line: u64,
    },
}

/// Lazy reader over a recorded log.
///
/// Yields snapshots in file order. The log is finite; call
/// [`LogReader::restart`] to read it again from the start.
pub struct LogReader {
    path: PathBuf,
    format: LogFormat,
    inner: ReaderInner,
}

impl fmt::Debug for LogReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogReader")
            .field("path", &self.path)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn open_file(path: &Path) -> Result<File, LogError> {
    File::open(path).map_err(|source| LogError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn open_inner(path: &Path, format: LogFormat) -> Result<ReaderInner, LogError> {
    let file = open_file(path)?;
    Ok(match format {
        LogFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_reader(file);
            let headers = reader.headers().map_err(|e| csv_format_error(&e))?.clone();
            ReaderInner::Csv {
                reader,
                headers,
                record: csv::StringRecord::new(),
            }
        }
        LogFormat::Json => ReaderInner::Json {
            lines: BufReader::new(file).split(b'\n'),
            line: 0,
        },
    })
}

fn csv_format_error(err: &csv::Error) -> LogError {
    LogError::Format {
        position: err.position().map_or(0, csv::Position::line),
        message: err.to_string(),
    }
}

impl LogReader {
    pub fn open(path: impl Into<PathBuf>, format: LogFormat) -> Result<Self, LogError> {
        let path = path.into();
        let inner = open_inner(&path, format)?;
        tracing::debug!(path = %path.display(), %format, "opened recorded log");
        Ok(Self {
            path,
            format,
            inner,
        })
    }

    /// Rewinds to the first record.
    pub fn restart(&mut self) -> Result<(), LogError> {
        self.inner = open_inner(&self.path, self.format)?;
        Ok(())
    }

}

impl Iterator for LogReader {
    type Item = Result<PresenceSnapshot, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            ReaderInner::Csv {
                reader,
                headers,
                record,
            } => match reader.read_record(record) {
                Ok(false) => None,
                Err(err) => Some(Err(csv_format_error(&err))),
                Ok(true) => {
                    let position = record.position().map_or(0, csv::Position::line);
                    let parsed = record
                        .deserialize::<LogRecord>(Some(headers))
                        .map_err(|e| e.to_string())
                        .and_then(LogRecord::into_snapshot)
                        .map_err(|message| LogError::Format { position, message });
                    Some(parsed)
                }
            },
            ReaderInner::Json { lines, line } => loop {
                let bytes = match lines.next()? {
                    Ok(bytes) => bytes,
                    Err(err) => return Some(Err(LogError::Io(err))),
                };
                *line += 1;
                let position = *line;
                let text = match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(err) => {
                        return Some(Err(LogError::Format {
                            position,
                            message: format!("invalid UTF-8: {err}"),
                        }));
                    }
                };
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let parsed = serde_json::from_str::<LogRecord>(trimmed)
                    .map_err(|e| e.to_string())
                    .and_then(LogRecord::into_snapshot)
                    .map_err(|message| LogError::Format { position, message });
                return Some(parsed);
            },
        }
    }
}

/// Reads a whole log, stopping at the first bad record.
pub fn read_log(path: &Path, format: LogFormat) -> Result<Vec<PresenceSnapshot>, LogError> {
    LogReader::open(path, format)?.collect()
}

enum WriterInner {
    Csv(csv::Writer<File>),
    Json(BufWriter<File>),
}

/// Appends snapshots to a recorded log.
pub struct LogWriter {
    path: PathBuf,
    inner: WriterInner,
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl LogWriter {
    /// Opens `path` for appending, creating it if necessary.
    ///
    /// The CSV header is written only when the file is empty.
    pub fn append(path: impl Into<PathBuf>, format: LogFormat) -> Result<Self, LogError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LogError::Open {
                path: path.clone(),
                source,
            })?;
        let is_new = file.metadata()?.len() == 0;

        let inner = match format {
            LogFormat::Csv => WriterInner::Csv(
                csv::WriterBuilder::new()
                    .has_headers(is_new)
                    .from_writer(file),
            ),
            LogFormat::Json => WriterInner::Json(BufWriter::new(file)),
        };
        tracing::debug!(path = %path.display(), %format, is_new, "opened log for append");
        Ok(Self { path, inner })
    }

    /// Writes one acquisition and flushes it to disk.
    pub fn write_batch(&mut self, snapshots: &[PresenceSnapshot]) -> Result<(), LogError> {
        match &mut self.inner {
            WriterInner::Csv(writer) => {
                for snapshot in snapshots {
                    writer.serialize(LogRecord::from_snapshot(snapshot))?;
                }
                writer.flush()?;
            }
            WriterInner::Json(writer) => {
                for snapshot in snapshots {
                    serde_json::to_writer(&mut *writer, &LogRecord::from_snapshot(snapshot))?;
                    writer.write_all(b"\n")?;
                }
                writer.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::seconds(secs)
    }

    fn sample_snapshots() -> Vec<PresenceSnapshot> {
        let profile = UserProfile {
            first_name: Some("Pavel".to_string()),
            last_name: Some("Durov".to_string()),
            screen_name: Some("durov".to_string()),
        };
        vec![
            PresenceSnapshot::new(UserId::new("1").unwrap(), ts(0), true)
                .with_profile(profile.clone()),
            PresenceSnapshot::new(UserId::new("1").unwrap(), ts(5), false)
                .with_profile(profile)
                .with_last_seen(LastSeen {
                    time: ts(3),
                    platform: Some(Platform::Android),
                }),
        ]
    }

    #[test]
    fn csv_append_then_read_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.csv");
        let snapshots = sample_snapshots();

        let mut writer = LogWriter::append(&path, LogFormat::Csv).unwrap();
        writer.write_batch(&snapshots[..1]).unwrap();
        drop(writer);
        let mut writer = LogWriter::append(&path, LogFormat::Csv).unwrap();
        writer.write_batch(&snapshots[1..]).unwrap();
        drop(writer);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.lines().filter(|l| l.starts_with("observed_at")).count(),
            1,
            "header must be written once"
        );
        assert_eq!(read_log(&path, LogFormat::Csv).unwrap(), snapshots);
    }

    #[test]
    fn json_append_then_read_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        let snapshots = sample_snapshots();

        let mut writer = LogWriter::append(&path, LogFormat::Json).unwrap();
        writer.write_batch(&snapshots).unwrap();
        drop(writer);

        assert_eq!(read_log(&path, LogFormat::Json).unwrap(), snapshots);
    }

    #[test]
    fn csv_accepts_legacy_flags_and_platform_codes() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.csv");
        std::fs::write(
            &path,
            "observed_at,user_id,first_name,last_name,screen_name,online,last_seen,last_seen_platform\n\
             2025-01-15T09:00:00Z,1,Pavel,,,True,,\n\
             2025-01-15T09:00:05Z,1,Pavel,,,0,2025-01-15T09:00:03Z,7\n",
        )
        .unwrap();

        let snapshots = read_log(&path, LogFormat::Csv).unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].is_online);
        assert_eq!(snapshots[0].profile.last_name, None);
        assert!(!snapshots[1].is_online);
        assert_eq!(
            snapshots[1].last_seen,
            Some(LastSeen {
                time: ts(3),
                platform: Some(Platform::Web),
            })
        );
    }

    #[test]
    fn csv_bad_record_reports_line() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.csv");
        std::fs::write(
            &path,
            "observed_at,user_id,first_name,last_name,screen_name,online,last_seen,last_seen_platform\n\
             2025-01-15T09:00:00Z,1,,,,true,,\n\
             2025-01-15T09:00:05Z,1,,,,maybe,,\n",
        )
        .unwrap();

        let err = read_log(&path, LogFormat::Csv).unwrap_err();
        match err {
            LogError::Format { position, message } => {
                assert_eq!(position, 3);
                assert!(message.contains("invalid online flag"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_empty_user_id_reports_line() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        std::fs::write(
            &path,
            "{\"observed_at\":\"2025-01-15T09:00:00Z\",\"user_id\":\"1\",\"online\":true}\n\
             \n\
             {\"observed_at\":\"2025-01-15T09:00:05Z\",\"user_id\":\"\",\"online\":false}\n",
        )
        .unwrap();

        let err = read_log(&path, LogFormat::Json).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid record at line 3: user ID cannot be empty"
        );
    }

    #[test]
    fn json_invalid_utf8_reports_line() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        let mut bytes =
            b"{\"observed_at\":\"2025-01-15T09:00:00Z\",\"user_id\":\"1\",\"online\":true}\n".to_vec();
        bytes.extend_from_slice(b"{\"observed_at\":\"2025-01-15T09:00:05Z\",\"user_id\":\"\xff\"}\n");
        std::fs::write(&path, bytes).unwrap();

        let mut reader = LogReader::open(&path, LogFormat::Json).unwrap();
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(
            matches!(err, LogError::Format { position: 2, .. }),
            "unexpected error: {err:?}"
        );
        assert!(err.to_string().starts_with("invalid record at line 2: invalid UTF-8"));
    }

    #[test]
    fn reader_is_lazy_and_restartable() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log.jsonl");
        let mut writer = LogWriter::append(&path, LogFormat::Json).unwrap();
        writer.write_batch(&sample_snapshots()).unwrap();
        drop(writer);

        let mut reader = LogReader::open(&path, LogFormat::Json).unwrap();
        let first = reader.next().unwrap().unwrap();
        assert_eq!(reader.by_ref().count(), 1);
        assert!(reader.next().is_none());

        reader.restart().unwrap();
        assert_eq!(reader.next().unwrap().unwrap(), first);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let temp = tempfile::tempdir().unwrap();
        let err = LogReader::open(temp.path().join("nope.csv"), LogFormat::Csv).unwrap_err();
        assert!(matches!(err, LogError::Open { .. }));
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!("jsonl".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
