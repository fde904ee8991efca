/// Utility helpers shared by the pipeline stages.
///
/// This module contains:
/// - Time helpers (replay window boundary)
/// - Logging setup (console + optional file mirror)
///
/// IMPORTANT:
/// - No pipeline or collaborator logic should live here.
///
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use anyhow::Context;
use chrono::{DateTime, NaiveTime, Utc};

use crate::config::DebugConfig;

/// Returns midnight (00:00:00 UTC) of the day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

// ------------------------------------------------------------
// Logging
// ------------------------------------------------------------
//
// env_logger writes to a single target; a mirrored log file is
// handled by a writer that forwards every line to stderr too.
//
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Initializes env_logger (default level `info`, `RUST_LOG` wins).
pub fn init_logging(debug: Option<&DebugConfig>) -> anyhow::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Some(path) = debug.and_then(|d| d.log_file.as_deref()) {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
    }

    builder.try_init()?;
    Ok(())
}
