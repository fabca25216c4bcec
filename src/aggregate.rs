//! Folds probe results and third-party assets into one [`TargetRecord`] per
//! host.
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use serde::Serialize;

use crate::scanner::ProbeResult;
use crate::target::{NormalizedTarget, Scheme, HTTPS_PORT, HTTP_PORT};

/// A finalized scan target, as handed to the scan dispatcher.
///
/// `port` is the canonical port: 443 if both web ports are open, else
/// whichever of 80/443 is open, else the port the record was seeded with.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub ports_open: BTreeSet<u16>,
    pub has_http: bool,
}

impl TargetRecord {
    fn seeded(scheme: Scheme, host: String, port: Option<u16>, path: String, open: u16) -> Self {
        Self {
            scheme,
            host,
            port,
            path,
            ports_open: BTreeSet::from([open]),
            has_http: false,
        }
    }

    fn is_web_confirmed(&self) -> bool {
        self.ports_open.contains(&HTTP_PORT) || self.ports_open.contains(&HTTPS_PORT)
    }

    /// Applies the 443 > 80 > seeded-port priority and computes `has_http`.
    fn finalize(mut self) -> Self {
        let http = self.ports_open.contains(&HTTP_PORT);
        let https = self.ports_open.contains(&HTTPS_PORT);

        if https {
            self.port = Some(HTTPS_PORT);
            self.scheme = Scheme::Https;
        } else if http {
            self.port = Some(HTTP_PORT);
            self.scheme = Scheme::Http;
        }

        self.has_http = self.is_web_confirmed()
            || self.port.is_some_and(|port| self.ports_open.contains(&port));
        self
    }
}

/// Owns the records while results are folded in.
#[derive(Debug, Default)]
pub struct Aggregator {
    records: HashMap<String, TargetRecord>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one probe result. Closed results never create or touch a
    /// record. The fold is order-independent.
    pub fn fold(&mut self, result: ProbeResult) {
        if !result.is_open() {
            return;
        }

        match self.records.entry(result.host.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().ports_open.insert(result.port);
            }
            Entry::Vacant(entry) => {
                entry.insert(TargetRecord::seeded(
                    result.scheme,
                    result.host,
                    Some(result.canonical_port),
                    result.path,
                    result.port,
                ));
            }
        }
    }

    /// Merges one asset URL found by the third-party search. Skipped when
    /// its host already has a record and the asset is on 80 or 443;
    /// otherwise stored under its `host:port` key, replacing any earlier
    /// asset with that key.
    pub fn merge_asset(&mut self, asset: &str) {
        let target = match NormalizedTarget::parse(asset) {
            Ok(target) => target,
            Err(e) => {
                warn!("Ignoring third-party asset {asset:?}: {e}");
                return;
            }
        };
        let Some(port) = target.port else {
            warn!("Ignoring third-party asset {asset:?}: no port");
            return;
        };

        if self.records.contains_key(&target.host) && matches!(port, HTTP_PORT | HTTPS_PORT) {
            debug!("Skipping third-party asset {asset:?}: host already probed");
            return;
        }

        let key = format!("{}:{port}", target.host);
        let record = TargetRecord::seeded(target.scheme, key.clone(), Some(port), target.path, port);
        self.records.insert(key, record);
    }

    /// Finalizes every record. Order is unspecified.
    pub fn finish(self) -> impl Iterator<Item = TargetRecord> {
        self.records.into_values().map(|record| {
            let record = record.finalize();
            debug!("Scan target details: {record:?}");
            record
        })
    }
}

/// Convenience wrapper: fold `results`, merge `assets`, finalize.
pub fn aggregate<R, A>(results: R, assets: A) -> Vec<TargetRecord>
where
    R: IntoIterator<Item = ProbeResult>,
    A: IntoIterator,
    A::Item: AsRef<str>,
{
    let mut aggregator = Aggregator::new();
    results.into_iter().for_each(|result| aggregator.fold(result));
    assets
        .into_iter()
        .for_each(|asset| aggregator.merge_asset(asset.as_ref()));
    aggregator.finish().collect()
}
