use std::io::{BufRead, Write};
use std::ops::AddAssign;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{debug, debug_span};

use crate::access_record::{AccessRecord, TimestampZone};
use crate::skip::Skip;

pub const ACCESS_LOGGER: &str = "http.log.access.log0";

/// Convert Caddy JSON access logs to Combined Log Format.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// Input files, read in order. `-` or nothing reads standard input
    #[clap(parse(from_os_str))]
    pub files: Vec<PathBuf>,

    /// Only entries from this logger are converted
    #[clap(short, long, default_value_t = ACCESS_LOGGER.to_string())]
    pub logger: String,

    /// Render timestamps in UTC instead of local time
    #[clap(short, long)]
    pub utc: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub lines: u64,
    pub emitted: u64,
    pub skipped: u64,
}

impl AddAssign for Stats {
    fn add_assign(&mut self, other: Stats) {
        self.lines += other.lines;
        self.emitted += other.emitted;
        self.skipped += other.skipped;
    }
}

pub struct LogTransformer {
    logger: String,
    zone: TimestampZone,
}

impl LogTransformer {
    pub fn new(config: &Config) -> LogTransformer {
        LogTransformer {
            logger: config.logger.clone(),
            zone: match config.utc {
                true => TimestampZone::Utc,
                false => TimestampZone::Local,
            },
        }
    }

    /// Converts one JSON line to a CLF line, or `None` if the line is skipped.
    /// The skip reason is only reported as a debug event.
    pub fn convert(&self, line: &str) -> Option<String> {
        match self.try_convert(line) {
            Ok(clf) => Some(clf),
            Err(reason) => {
                debug!(%reason, "skipping line");
                None
            }
        }
    }

    fn try_convert(&self, line: &str) -> Result<String, Skip> {
        let value: Value = serde_json::from_str(line).map_err(Skip::Json)?;
        let obj = value.as_object().ok_or(Skip::NotAnObject)?;

        match obj.get("logger") {
            Some(Value::String(logger)) if *logger == self.logger => {}
            other => {
                return Err(Skip::OtherLogger(
                    other.and_then(Value::as_str).map(str::to_string),
                ))
            }
        }

        AccessRecord::from_value(&value)?.to_clf(self.zone)
    }

    /// Converts every line of `reader`, writing surviving lines to `writer`.
    ///
    /// Per-line failures are skips; only I/O errors abort.
    pub fn process<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        writer: &mut W,
    ) -> anyhow::Result<Stats> {
        let mut stats = Stats::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .context("Could not read input")?;
            if read == 0 {
                break;
            }
            stats.lines += 1;

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    debug!(line = stats.lines, error = %e, "skipping non-utf8 line");
                    stats.skipped += 1;
                    continue;
                }
            };

            if line.is_empty() {
                stats.skipped += 1;
                continue;
            }

            let converted = {
                let _line = debug_span!("line", number = stats.lines).entered();
                self.convert(line)
            };

            match converted {
                Some(clf) => {
                    writeln!(writer, "{}", clf).context("Could not write output")?;
                    stats.emitted += 1;
                }
                None => stats.skipped += 1,
            }
        }

        Ok(stats)
    }
}
