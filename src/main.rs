use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use tokio::sync::mpsc;

use reconscan::address::DomainResolver;
use reconscan::input::{Config, Opts};
use reconscan::pipeline::{ExecutionContext, Pipeline};

#[cfg(not(tarpaulin_include))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    if let Some(limit) = opts.ulimit {
        adjust_ulimit_size(limit);
    }

    let targets = collect_targets(&opts)?;
    if targets.is_empty() {
        bail!("no targets given, use --addresses or --file");
    }

    if opts.asset_credentials().is_some() {
        warn!("Asset search credentials given, but this build has no asset search client");
    }

    let resolver = ExecutionContext::new()?.run(DomainResolver::with_backup(opts.resolver.as_deref()));
    let pipeline = Pipeline::new(opts.pipeline_config())?
        .with_resolver(resolver)
        .with_progress(progress_bar(opts.no_progress));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let published = pipeline.run(&targets, &tx)?;
    drop(tx);

    while let Ok(record) = rx.try_recv() {
        println!("{}", serde_json::to_string(&record)?);
    }

    eprintln!(
        "{}",
        format!("{published} live targets out of {} inputs", targets.len()).green()
    );
    Ok(())
}

/// Targets from `--addresses` followed by the lines of `--file`.
fn collect_targets(opts: &Opts) -> anyhow::Result<Vec<String>> {
    let mut targets = opts.addresses.clone();
    if let Some(path) = &opts.file {
        targets.extend(read_targets_file(path)?);
    }
    Ok(targets)
}

fn read_targets_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read targets from {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::with_template(
        "{msg:.cyan} [{bar:40}] {percent:>3}% {eta} {pos}/{len}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());

    ProgressBar::new(0)
        .with_style(style)
        .with_message("Port detection")
}

#[cfg(unix)]
fn adjust_ulimit_size(limit: u64) {
    match rlimit::increase_nofile_limit(limit) {
        Ok(raised) => debug!("Raised open file limit to {raised}"),
        Err(e) => warn!("ERROR. Failed to set ulimit value: {e}"),
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_limit: u64) {
    warn!("Setting the open file limit is not supported on this platform");
}
