//! Core functionality for TCP liveness probing.
use std::{sync::Arc, time::Duration};

use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use log::debug;
use tokio::{
    io::{self, AsyncWriteExt},
    net::TcpStream,
    time,
};

use crate::port_strategy::ProbeCandidate;
use crate::target::Scheme;

/// Default admission gate: probes in flight at once.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default per-probe connect timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortStatus {
    Open,
    Closed,
}

/// A probed candidate. Exactly one is produced per candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeResult {
    pub host: String,
    pub port: u16,
    pub status: PortStatus,
    pub scheme: Scheme,
    pub path: String,
    pub canonical_port: u16,
}

impl ProbeResult {
    fn from_candidate(candidate: ProbeCandidate, status: PortStatus) -> Self {
        Self {
            host: candidate.host,
            port: candidate.port,
            status,
            scheme: candidate.scheme,
            path: candidate.path,
            canonical_port: candidate.canonical_port,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PortStatus::Open
    }
}

#[derive(Debug)]
struct ProbeConnector {
    timeout: Duration,
    progress: ProgressBar,
}

impl ProbeConnector {
    /// Connects to the candidate once. Any failure, including the timeout
    /// and a failed name lookup, counts as closed. Always advances the
    /// progress counter by one.
    async fn probe(&self, candidate: ProbeCandidate) -> ProbeResult {
        let status = match self.connect(&candidate.host, candidate.port).await {
            Ok(tcp_stream) => {
                debug!(
                    "Connection was successful, shutting down stream {}:{}",
                    candidate.host, candidate.port
                );
                if let Err(e) = { tcp_stream }.shutdown().await {
                    debug!("Shutdown stream error {}", &e);
                }
                PortStatus::Open
            }
            Err(_) => PortStatus::Closed,
        };

        self.progress.inc(1);
        ProbeResult::from_candidate(candidate, status)
    }

    /// Performs the connection to the host with timeout.
    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        time::timeout(self.timeout, TcpStream::connect((host, port))).await?
    }
}

/// Probes candidates with at most `batch_size` connection attempts in
/// flight. No retries: one failed attempt is final for the run.
#[derive(Debug)]
pub struct Scanner {
    batch_size: usize,
    connector: Arc<ProbeConnector>,
}

impl Scanner {
    /// A batch size of zero is corrected to one.
    pub fn new(batch_size: usize, timeout: Duration, progress: ProgressBar) -> Self {
        Self {
            batch_size: batch_size.max(1),
            connector: Arc::new(ProbeConnector { timeout, progress }),
        }
    }

    /// The shared completion counter, advanced once per finished probe.
    pub fn progress(&self) -> &ProgressBar {
        &self.connector.progress
    }

    /// Probes every candidate and returns the results in completion order.
    pub async fn run<I>(&self, candidates: I) -> Vec<ProbeResult>
    where
        I: IntoIterator<Item = ProbeCandidate>,
    {
        let candidates = candidates.into_iter().collect::<Vec<_>>();
        self.connector
            .progress
            .inc_length(candidates.len() as u64);

        debug!(
            "Start probing. \nBatch size {}\nCandidates {}",
            self.batch_size,
            candidates.len()
        );

        let results = stream::iter(candidates)
            .map(|candidate| {
                let connector = Arc::clone(&self.connector);
                async move { connector.probe(candidate).await }
            })
            .buffer_unordered(self.batch_size)
            .collect::<Vec<_>>()
            .await;

        debug!(
            "Open sockets found: {}",
            results.iter().filter(|r| r.is_open()).count()
        );
        results
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT, ProgressBar::hidden())
    }
}
