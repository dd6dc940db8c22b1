//! Batch mode: recorded log to per-user online time.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use pt_core::{PeriodReconstructor, UserId, UserProfile, aggregate_durations};
use pt_log::{LogFormat, LogReader};

use crate::cli::StreaksArgs;
use crate::output::{OutputFormat, OutputWriter, StreakRow};

/// Fills identity fields the log has seen so far; later non-empty values win.
fn merge_profile(known: &mut UserProfile, seen: UserProfile) {
    fn keep(slot: &mut Option<String>, value: Option<String>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            *slot = Some(value);
        }
    }
    keep(&mut known.first_name, seen.first_name);
    keep(&mut known.last_name, seen.last_name);
    keep(&mut known.screen_name, seen.screen_name);
}

/// Reads the whole log and returns total online time per user.
///
/// Users appear in the order of their first online period.
pub fn compute_streaks(input: &Path, format: LogFormat) -> Result<Vec<StreakRow>> {
    let reader = LogReader::open(input, format)
        .with_context(|| format!("failed to open {}", input.display()))?;

    let mut profiles: HashMap<UserId, UserProfile> = HashMap::new();
    let mut reconstructor = PeriodReconstructor::new();
    for snapshot in reader {
        let mut snapshot = snapshot.with_context(|| format!("failed to read {}", input.display()))?;
        let profile = std::mem::take(&mut snapshot.profile);
        merge_profile(profiles.entry(snapshot.user_id.clone()).or_default(), profile);
        reconstructor
            .push(snapshot)
            .context("failed to reconstruct online periods")?;
    }

    let reconstruction = reconstructor.finish();
    tracing::debug!(
        periods = reconstruction.periods.len(),
        stats = ?reconstruction.stats,
        "reconstructed online periods"
    );

    Ok(aggregate_durations(&reconstruction.periods)
        .into_iter()
        .map(|aggregated| StreakRow {
            profile: profiles
                .remove(&aggregated.user_id)
                .unwrap_or_default(),
            user_id: aggregated.user_id,
            total: aggregated.total_duration,
        })
        .collect())
}

fn write_rows<W: Write>(out: W, format: OutputFormat, rows: &[StreakRow]) -> Result<()> {
    let mut writer = OutputWriter::new(format, out);
    for row in rows {
        writer.write(row)?;
    }
    writer.finish()
}

pub fn run(args: &StreaksArgs) -> Result<()> {
    // Aggregate first so a bad log never leaves a partial output file.
    let rows = compute_streaks(&args.input, args.input_format)?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            write_rows(BufWriter::new(file), args.output_format, &rows)
        }
        None => write_rows(io::stdout().lock(), args.output_format, &rows),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const HEADER: &str =
        "observed_at,user_id,first_name,last_name,screen_name,online,last_seen,last_seen_platform\n";

    fn write_log(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("log.csv");
        std::fs::write(&path, format!("{HEADER}{body}")).unwrap();
        path
    }

    #[test]
    fn test_streaks_from_csv_log() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_log(
            temp.path(),
            "2025-01-15T09:00:00Z,1,Pavel,Durov,durov,true,,\n\
             2025-01-15T09:00:00Z,2,Ivan,Ivanov,,false,,\n\
             2025-01-15T09:00:30Z,1,Pavel,Durov,durov,false,2025-01-15T09:00:20Z,web\n\
             2025-01-15T09:00:30Z,2,Ivan,Ivanov,,true,,\n\
             2025-01-15T09:01:00Z,1,Pavel,Durov,durov,true,,\n\
             2025-01-15T09:01:00Z,2,Ivan,Ivanov,,false,,\n\
             2025-01-15T09:02:00Z,1,Pavel,Durov,durov,false,,\n",
        );

        let rows = compute_streaks(&path, LogFormat::Csv).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id.as_str(), "1");
        assert_eq!(rows[0].total, Duration::seconds(20 + 60));
        assert_eq!(rows[0].profile.screen_name.as_deref(), Some("durov"));
        assert_eq!(rows[1].user_id.as_str(), "2");
        assert_eq!(rows[1].total, Duration::seconds(30));
    }

    #[test]
    fn test_user_never_online_is_omitted() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_log(
            temp.path(),
            "2025-01-15T09:00:00Z,1,Pavel,Durov,,false,,\n\
             2025-01-15T09:00:05Z,1,Pavel,Durov,,false,,\n",
        );
        assert!(compute_streaks(&path, LogFormat::Csv).unwrap().is_empty());
    }

    #[test]
    fn test_profile_keeps_last_non_empty_values() {
        let mut known = UserProfile::default();
        merge_profile(
            &mut known,
            UserProfile {
                first_name: Some("Pavel".to_string()),
                last_name: Some("Durov".to_string()),
                screen_name: None,
            },
        );
        merge_profile(
            &mut known,
            UserProfile {
                first_name: Some(String::new()),
                last_name: None,
                screen_name: Some("durov".to_string()),
            },
        );
        assert_eq!(known.first_name.as_deref(), Some("Pavel"));
        assert_eq!(known.last_name.as_deref(), Some("Durov"));
        assert_eq!(known.screen_name.as_deref(), Some("durov"));
    }

    #[test]
    fn test_out_of_order_log_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_log(
            temp.path(),
            "2025-01-15T09:01:00Z,1,Pavel,Durov,,true,,\n\
             2025-01-15T09:00:00Z,1,Pavel,Durov,,false,,\n",
        );
        let err = compute_streaks(&path, LogFormat::Csv).unwrap_err();
        assert!(
            format!("{err:#}").contains("failed to reconstruct online periods"),
            "{err:#}"
        );
    }

    #[test]
    fn test_bad_record_reports_position() {
        let temp = tempfile::tempdir().unwrap();
        let path = write_log(
            temp.path(),
            "2025-01-15T09:00:00Z,1,Pavel,Durov,,true,,\n\
             not-a-time,1,Pavel,Durov,,false,,\n",
        );
        let err = compute_streaks(&path, LogFormat::Csv).unwrap_err();
        assert!(format!("{err:#}").contains("line 3"), "{err:#}");
    }
}
