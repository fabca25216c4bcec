//! Hands finalized targets to the scan engine one at a time.
//!
//! The engine itself lives outside this crate; [`TargetScanner`] is its
//! boundary. A failing scan never takes the batch down with it.
use log::error;
use tokio::sync::mpsc::UnboundedSender;

use crate::aggregate::TargetRecord;

/// Findings for one host, as reported by the scan engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport<T> {
    pub host: String,
    pub results: T,
}

/// The per-target scan engine.
pub trait TargetScanner {
    type Output;

    /// Scans one target. `Ok(None)` means nothing was found.
    fn scan(&self, target: &TargetRecord) -> anyhow::Result<Option<Self::Output>>;
}

/// Scans `target`, forwarding any findings to `results`.
///
/// Errors from the engine are logged and swallowed. The target's host is
/// returned in every case so batch accounting stays intact.
pub fn scan_target<S: TargetScanner>(
    scanner: &S,
    target: &TargetRecord,
    results: &UnboundedSender<ScanReport<S::Output>>,
) -> String {
    match scanner.scan(target) {
        Ok(Some(findings)) => {
            let report = ScanReport {
                host: target.host.clone(),
                results: findings,
            };
            if results.send(report).is_err() {
                error!("Result queue closed, dropping findings for {}", target.host);
            }
        }
        Ok(None) => {}
        Err(e) => error!("{e:#}"),
    }

    target.host.clone()
}
