use crate::cli::args::{Cli, Commands, CountArgs, TieStrandArg};
use crate::core::engine::{self, RunConfig, fmt_dur, log_stage, stats_enabled};
use crate::core::index::resolve_index_path;
use crate::core::resolver::TieBreak;
use crate::report;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

pub fn entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Count(args) => count(args),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn count(args: CountArgs) -> Result<()> {
    let stats = stats_enabled();
    let t0 = Instant::now();

    let t_pre = Instant::now();
    let index = preflight(&args)?;
    log_stage(stats, "preflight", t_pre);

    let mut config = RunConfig::new(index, args.reads.clone(), args.counts.clone(), args.threads);
    config.tie_break = match args.tie_strand {
        TieStrandArg::Reverse => TieBreak::Reverse,
        TieStrandArg::Forward => TieBreak::Forward,
    };

    let t_engine = Instant::now();
    let output = engine::run(&config)?;
    log_stage(stats, "engine", t_engine);

    if let Some(path) = &args.summary {
        let t_summary = Instant::now();
        report::summary_txt::write(path, &config, &output)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log_stage(stats, "summary", t_summary);
    }

    if stats {
        eprintln!("KIRA_STATS total={}", fmt_dur(t0.elapsed()));
    }
    Ok(())
}

fn preflight(args: &CountArgs) -> Result<std::path::PathBuf> {
    if args.threads == 0 {
        bail!("--threads must be >= 1");
    }
    if args.reads.is_empty() {
        bail!("at least one read file is required");
    }
    for path in &args.reads {
        if path.as_os_str() == "-" {
            bail!("stdin is not supported; provide read file paths");
        }
        if !path.is_file() {
            bail!("read file not found: {}", path.display());
        }
    }
    let index = resolve_index_path(&args.index)
        .with_context(|| format!("index not found: {}", args.index.display()))?;
    if let Some(parent) = args.counts.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            bail!("output directory does not exist: {}", parent.display());
        }
    }
    Ok(index)
}
