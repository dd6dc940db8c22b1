//! Live tracking: poll users and print every status change.

use std::fmt::Display;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use pt_core::{NotificationKind, NotificationSink, PresenceSnapshot, StatusTracker, UserId};
use pt_log::LogWriter;
use pt_vk::Client;

use crate::Config;
use crate::cli::TrackArgs;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats the notification lines for one status change.
///
/// Initial offline users with a trusted last-seen time get a second line.
pub fn format_notification<Tz>(
    snapshot: &PresenceSnapshot,
    kind: NotificationKind,
    tz: &Tz,
) -> Vec<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = |time: DateTime<Utc>| time.with_timezone(tz).format(TIME_FORMAT).to_string();
    let name = snapshot.display_name();
    let status = match kind {
        NotificationKind::InitialOnline => "is ONLINE",
        NotificationKind::InitialOffline => "is OFFLINE",
        NotificationKind::WentOnline => "went ONLINE",
        NotificationKind::WentOffline => "went OFFLINE",
    };

    let mut lines = vec![format!("[{}] {name} {status}", local(snapshot.observed_at))];
    if kind == NotificationKind::InitialOffline {
        if let Some(last_seen) = snapshot.trusted_last_seen() {
            lines.push(format!(
                "[{}] {name} was last seen at {}",
                local(snapshot.observed_at),
                local(last_seen)
            ));
        }
    }
    lines
}

/// Prints notifications and optionally records every acquisition.
pub struct ConsoleSink<W> {
    out: W,
    recorder: Option<LogWriter>,
}

impl<W: Write> ConsoleSink<W> {
    pub const fn new(out: W, recorder: Option<LogWriter>) -> Self {
        Self { out, recorder }
    }
}

impl<W: Write> NotificationSink for ConsoleSink<W> {
    fn notify(&mut self, snapshot: &PresenceSnapshot, kind: NotificationKind) -> io::Result<()> {
        for line in format_notification(snapshot, kind, &Local) {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }

    fn acquired(&mut self, batch: &[PresenceSnapshot]) -> io::Result<()> {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.write_batch(batch).map_err(io::Error::other)?;
        }
        Ok(())
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to register SIGTERM handler");
                ctrl_c.await;
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received ctrl-c, shutting down");
    }
}

/// Opens the notification destination: a fresh file, or stdout.
fn notification_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    })
}

pub fn run(args: &TrackArgs, config: &Config) -> Result<()> {
    let user_ids = args
        .users
        .iter()
        .map(|user| UserId::new(user.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid user ID")?;
    let interval = Duration::from_secs(args.interval.unwrap_or(config.poll_interval_secs));
    let mut tracker =
        StatusTracker::new(user_ids, interval).context("invalid tracking parameters")?;

    let client = Client::new(config.client_config()).context("failed to create VK client")?;

    let out = notification_output(args.log.as_deref())?;
    let recorder = args
        .record
        .as_ref()
        .map(|path| LogWriter::append(path, args.record_format))
        .transpose()
        .context("failed to open recorded log")?;
    let mut sink = ConsoleSink::new(out, recorder);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to initialize tokio runtime")?;
    runtime
        .block_on(tracker.run(&client, &mut sink, shutdown_signal()))
        .context("tracking stopped")?;
    Ok(())
}
