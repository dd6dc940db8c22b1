//! Output writers for aggregated online time.
//!
//! One writer per run, selected by [`OutputFormat`]. Rows are written in the
//! order given and flushed by [`OutputWriter::finish`].

use std::io::Write;

use anyhow::Result;
use chrono::Duration;
use clap::ValueEnum;
use pt_core::{UserId, UserProfile};
use serde::{Deserialize, Serialize};

const CHART_TITLE: &str = "How much time people spend online?";
const CHART_WIDTH: i64 = 40;

/// Output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Headerless CSV, one row per user.
    #[default]
    Csv,
    /// Pretty-printed JSON array.
    Json,
    /// Text bar chart.
    Chart,
}

/// Total online time of one user, with identity fields for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakRow {
    pub user_id: UserId,
    pub profile: UserProfile,
    pub total: Duration,
}

impl StreakRow {
    /// Chart label: "Last First" when both names are known.
    pub fn label(&self) -> String {
        let first = self.profile.first_name.as_deref().unwrap_or_default();
        let last = self.profile.last_name.as_deref().unwrap_or_default();
        let name = format!("{last} {first}");
        let name = name.trim();
        if name.is_empty() {
            format!("id{}", self.user_id)
        } else {
            name.to_string()
        }
    }
}

/// Row layout shared by the CSV and JSON encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub screen_name: String,
    pub duration: String,
}

impl From<&StreakRow> for OutputRecord {
    fn from(row: &StreakRow) -> Self {
        Self {
            user_id: row.user_id.to_string(),
            first_name: row.profile.first_name.clone().unwrap_or_default(),
            last_name: row.profile.last_name.clone().unwrap_or_default(),
            screen_name: row.profile.screen_name.clone().unwrap_or_default(),
            duration: format_duration(row.total),
        }
    }
}

/// Formats a duration as `H:MM:SS`; hours are unbounded, sub-seconds dropped.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

/// Writer for one output encoding.
pub enum OutputWriter<W: Write> {
    Csv(csv::Writer<W>),
    Json { out: W, records: Vec<OutputRecord> },
    Chart { out: W, rows: Vec<StreakRow> },
}

impl<W: Write> OutputWriter<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        match format {
            OutputFormat::Csv => Self::Csv(
                csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(out),
            ),
            OutputFormat::Json => Self::Json {
                out,
                records: Vec::new(),
            },
            OutputFormat::Chart => Self::Chart {
                out,
                rows: Vec::new(),
            },
        }
    }

    pub fn write(&mut self, row: &StreakRow) -> Result<()> {
        match self {
            Self::Csv(writer) => writer.serialize(OutputRecord::from(row))?,
            Self::Json { records, .. } => records.push(OutputRecord::from(row)),
            Self::Chart { rows, .. } => rows.push(row.clone()),
        }
        Ok(())
    }

    /// Writes any buffered output and flushes.
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Csv(mut writer) => writer.flush()?,
            Self::Json { mut out, records } => {
                serde_json::to_writer_pretty(&mut out, &records)?;
                writeln!(out)?;
                out.flush()?;
            }
            Self::Chart { mut out, rows } => {
                out.write_all(render_chart(&rows).as_bytes())?;
                out.flush()?;
            }
        }
        Ok(())
    }
}

/// Renders a horizontal bar chart scaled to the longest total.
pub fn render_chart(rows: &[StreakRow]) -> String {
    let mut output = format!("{CHART_TITLE}\n\n");
    if rows.is_empty() {
        output.push_str("(no data)\n");
        return output;
    }

    let labels: Vec<String> = rows.iter().map(StreakRow::label).collect();
    let label_width = labels
        .iter()
        .map(|label| label.chars().count())
        .max()
        .unwrap_or(0);
    let longest = rows
        .iter()
        .map(|row| row.total.num_seconds().max(0))
        .max()
        .unwrap_or(0);

    for (row, label) in rows.iter().zip(&labels) {
        let secs = row.total.num_seconds().max(0);
        let filled = if longest == 0 {
            0
        } else {
            // Nonzero totals always get at least one block.
            ((secs * CHART_WIDTH + longest / 2) / longest).max(i64::from(secs > 0))
        };
        let bar = "█".repeat(usize::try_from(filled).unwrap_or(0));
        output.push_str(&format!(
            "{label:<label_width$} | {bar} {}\n",
            format_duration(row.total)
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn row(id: &str, first: &str, last: &str, secs: i64) -> StreakRow {
        StreakRow {
            user_id: UserId::new(id).unwrap(),
            profile: UserProfile {
                first_name: Some(first.to_string()),
                last_name: Some(last.to_string()),
                screen_name: Some(format!("user{id}")),
            },
            total: Duration::seconds(secs),
        }
    }

    fn written(format: OutputFormat, rows: &[StreakRow]) -> String {
        let mut buf = Vec::new();
        let mut writer = OutputWriter::new(format, &mut buf);
        for row in rows {
            writer.write(row).unwrap();
        }
        writer.finish().unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::zero()), "0:00:00");
        assert_eq!(format_duration(Duration::seconds(75)), "0:01:15");
        assert_eq!(format_duration(Duration::seconds(3_661)), "1:01:01");
        assert_eq!(format_duration(Duration::hours(30)), "30:00:00");
        assert_eq!(format_duration(Duration::milliseconds(1_999)), "0:00:01");
        assert_eq!(format_duration(Duration::seconds(-5)), "0:00:00");
    }

    #[test]
    fn test_csv_round_trips_identity_and_duration() {
        let rows = vec![
            row("1", "Pavel", "Durov", 4_500),
            row("2", "Anna, Maria", "Ivanova", 75),
        ];
        let csv_text = written(OutputFormat::Csv, &rows);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(csv_text.as_bytes());
        let parsed: Vec<OutputRecord> = reader.deserialize().map(Result::unwrap).collect();
        let expected: Vec<OutputRecord> = rows.iter().map(OutputRecord::from).collect();
        assert_eq!(parsed, expected);
        assert_eq!(parsed[0].duration, "1:15:00");
    }

    #[test]
    fn test_csv_has_no_header() {
        let csv_text = written(OutputFormat::Csv, &[row("1", "Pavel", "Durov", 60)]);
        assert_eq!(csv_text, "1,Pavel,Durov,user1,0:01:00\n");
    }

    #[test]
    fn test_json_output() {
        let json = written(OutputFormat::Json, &[row("1", "Pavel", "Durov", 60)]);
        assert_snapshot!(json, @r#"
        [
          {
            "user_id": "1",
            "first_name": "Pavel",
            "last_name": "Durov",
            "screen_name": "user1",
            "duration": "0:01:00"
          }
        ]
        "#);
    }

    #[test]
    fn test_json_empty_is_empty_array() {
        assert_eq!(written(OutputFormat::Json, &[]), "[]\n");
    }

    #[test]
    fn test_chart_output() {
        let chart = written(
            OutputFormat::Chart,
            &[
                row("1", "Pavel", "Durov", 3_600),
                row("2", "Ivan", "Ivanov", 900),
                row("3", "Olga", "Li", 1),
            ],
        );
        assert_snapshot!(chart, @r"
        How much time people spend online?

        Durov Pavel | ████████████████████████████████████████ 1:00:00
        Ivanov Ivan | ██████████ 0:15:00
        Li Olga     | █ 0:00:01
        ");
    }

    #[test]
    fn test_chart_empty() {
        assert_eq!(
            render_chart(&[]),
            "How much time people spend online?\n\n(no data)\n"
        );
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let mut anonymous = row("42", "", "", 10);
        anonymous.profile = UserProfile::default();
        assert_eq!(anonymous.label(), "id42");
        assert_eq!(row("1", "Pavel", "", 1).label(), "Pavel");
    }
}
