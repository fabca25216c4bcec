//! Wires the stages together: normalize, resolve (CDN filter, subnet
//! expansion), third-party asset search, probe, aggregate, publish.
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use anyhow::{ensure, Context};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::UnboundedSender;

use crate::address::{resolve_targets, DomainResolver, ResolvedTargets};
use crate::aggregate::{Aggregator, TargetRecord};
use crate::port_strategy::PortStrategy;
use crate::scanner::{Scanner, DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT};
use crate::subnet::{self, HOST_MASK};
use crate::target::NormalizedTarget;

/// Credentials enabling the third-party asset search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCredentials {
    pub email: String,
    pub key: String,
}

/// Everything the pipeline needs to know about one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub no_scripts: bool,
    pub required_ports: Vec<u16>,
    pub check_cdn: bool,
    /// Mask width for subnet expansion; 32 disables it.
    pub network: u8,
    /// Probes in flight at once.
    pub batch_size: usize,
    pub timeout: Duration,
    pub asset_credentials: Option<AssetCredentials>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            no_scripts: false,
            required_ports: Vec::new(),
            check_cdn: false,
            network: HOST_MASK,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            asset_credentials: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.network <= HOST_MASK,
            "network mask /{} is out of range (0-32)",
            self.network
        );
        Ok(())
    }
}

/// Decides which hosts are not fronted by a CDN.
pub trait CdnFilter {
    /// Returns the hosts (or addresses) that are safe to scan directly.
    fn filter(&self, hosts: &[String]) -> Vec<String>;
}

/// Passive lookup of additional web assets for a set of hosts.
pub trait AssetSearch {
    /// Returns asset URLs, e.g. `http://10.0.0.1:3000`.
    fn search(
        &self,
        credentials: &AssetCredentials,
        hosts: &HashSet<String>,
    ) -> anyhow::Result<Vec<String>>;
}

/// A single-threaded scheduler owned by one concurrent stage.
///
/// Built fresh for each stage and dropped when the stage returns, so the
/// resolution and probing stages never share one. Must not be entered from
/// inside another runtime.
#[derive(Debug)]
pub struct ExecutionContext {
    runtime: Runtime,
}

impl ExecutionContext {
    pub fn new() -> anyhow::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build stage runtime")?;
        Ok(Self { runtime })
    }

    /// Drives `stage` to completion, then tears the scheduler down. Returns
    /// only after every task spawned on it has been dropped and its blocking
    /// pool has exited.
    pub fn run<F: Future>(self, stage: F) -> F::Output {
        let output = self.runtime.block_on(stage);
        drop(self.runtime);
        output
    }
}

/// The orchestrator. Collaborators are optional; the stages that need them
/// are skipped when they are absent.
pub struct Pipeline {
    config: PipelineConfig,
    resolver: DomainResolver,
    cdn_filter: Option<Box<dyn CdnFilter>>,
    asset_search: Option<Box<dyn AssetSearch>>,
    progress: ProgressBar,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            resolver: DomainResolver::system_only(),
            cdn_filter: None,
            asset_search: None,
            progress: ProgressBar::hidden(),
        })
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: DomainResolver) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn with_cdn_filter(mut self, filter: impl CdnFilter + 'static) -> Self {
        self.cdn_filter = Some(Box::new(filter));
        self
    }

    #[must_use]
    pub fn with_asset_search(mut self, search: impl AssetSearch + 'static) -> Self {
        self.asset_search = Some(Box::new(search));
        self
    }

    /// Progress bar advanced once per finished probe.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Runs every stage and publishes each finalized record to `queue`.
    /// Returns the number of records published.
    ///
    /// Blocks the calling thread; call it from outside any async runtime.
    pub fn run(&self, raw_targets: &[String], queue: &UnboundedSender<TargetRecord>) -> anyhow::Result<usize> {
        let resolved = ExecutionContext::new()?.run(resolve_targets(raw_targets, &self.resolver));
        let scan_targets = self.scan_targets(resolved);

        let assets = self.search_assets(&scan_targets);

        let normalized = scan_targets
            .iter()
            .filter_map(|raw| match NormalizedTarget::parse(raw) {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!("Skipping target {raw:?}: {e}");
                    None
                }
            })
            .collect::<Vec<_>>();

        let strategy = PortStrategy::new(
            self.config.no_scripts,
            self.config.required_ports.iter().copied(),
        );
        let candidates = strategy.candidates(&normalized);
        info!(
            "Probing {} candidates across {} targets",
            candidates.len(),
            normalized.len()
        );

        let scanner = Scanner::new(self.config.batch_size, self.config.timeout, self.progress.clone());
        let results = ExecutionContext::new()?.run(scanner.run(candidates));
        self.progress.finish_and_clear();

        let mut aggregator = Aggregator::new();
        results.into_iter().for_each(|result| aggregator.fold(result));
        assets.iter().for_each(|asset| aggregator.merge_asset(asset));

        let mut published = 0;
        for record in aggregator.finish() {
            queue
                .send(record)
                .context("target queue closed before the pipeline finished")?;
            published += 1;
        }

        info!("Published {published} scan targets");
        Ok(published)
    }

    /// Merges resolved targets, CDN-filtered addresses and subnet
    /// expansion into one deduplicated set.
    fn scan_targets(&self, resolved: ResolvedTargets) -> HashSet<String> {
        let ResolvedTargets { targets, mut ips } = resolved;

        if self.config.check_cdn {
            match &self.cdn_filter {
                Some(filter) => ips = filter.filter(&targets),
                None => warn!("CDN check requested but no CDN filter is configured"),
            }
        }
        debug!("Targets without CDN: {ips:?}");

        let expansion = subnet::expand(&ips, self.config.network);

        targets
            .into_iter()
            .chain(ips.into_iter().filter(|ip| !ip.contains('/')))
            .chain(expansion.hosts)
            .collect()
    }

    fn search_assets(&self, scan_targets: &HashSet<String>) -> Vec<String> {
        let (Some(credentials), Some(search)) = (&self.config.asset_credentials, &self.asset_search) else {
            return Vec::new();
        };

        match search.search(credentials, scan_targets) {
            Ok(assets) => {
                debug!("Third-party assets: {assets:?}");
                assets
            }
            Err(e) => {
                error!("Asset search failed: {e:#}");
                Vec::new()
            }
        }
    }
}
