mod access_record;
mod log_transformer;
mod skip;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use atty::Stream;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::log_transformer::{Config, LogTransformer, Stats};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(atty::is(Stream::Stderr))
        .compact()
        .try_init();
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing();

    let inputs = match config.files.is_empty() {
        true => vec![PathBuf::from("-")],
        false => config.files.clone(),
    };

    if inputs.iter().any(|p| is_stdin(p)) && atty::is(Stream::Stdin) {
        warn!("reading from a terminal; pipe Caddy JSON access logs into stdin");
    }

    let transformer = LogTransformer::new(&config);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut stats = Stats::default();

    for input in &inputs {
        stats += if is_stdin(input) {
            transformer.process(io::stdin().lock(), &mut out)?
        } else {
            let file = File::open(input)
                .with_context(|| format!("Could not open {}", input.display()))?;
            transformer
                .process(BufReader::new(file), &mut out)
                .with_context(|| format!("Failed while converting {}", input.display()))?
        };
    }

    out.flush().context("Could not write output")?;

    info!(
        lines = stats.lines,
        emitted = stats.emitted,
        skipped = stats.skipped,
        "conversion finished"
    );

    Ok(())
}
