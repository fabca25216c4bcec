//! Decides which (host, port) pairs each target needs probed.
use std::collections::{BTreeSet, HashSet};

use crate::target::{NormalizedTarget, Scheme, HTTPS_PORT, HTTP_PORT};

/// One unit of probing work.
///
/// `canonical_port` is the port the target will be represented by if this
/// candidate turns out to be the first open port seen for its host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeCandidate {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub path: String,
    pub canonical_port: u16,
}

impl ProbeCandidate {
    fn new(target: &NormalizedTarget, port: u16, canonical_port: u16) -> Self {
        Self {
            host: target.host.clone(),
            port,
            scheme: target.scheme,
            path: target.path.clone(),
            canonical_port,
        }
    }
}

/// Represents which ports get probed for every target.
///
/// A target with an explicit port is probed on that port only, a target
/// without one on both 80 and 443. Unless scripts are disabled, the ports
/// the scripts require are probed as well.
#[derive(Debug, Clone, Default)]
pub struct PortStrategy {
    no_scripts: bool,
    required_ports: BTreeSet<u16>,
}

impl PortStrategy {
    pub fn new(no_scripts: bool, required_ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            no_scripts,
            required_ports: required_ports.into_iter().collect(),
        }
    }

    /// Candidates for a single target, possibly with duplicates.
    pub fn candidates_for<'a>(
        &'a self,
        target: &'a NormalizedTarget,
    ) -> impl Iterator<Item = ProbeCandidate> + 'a {
        let (defaults, canonical_port) = match target.port {
            Some(port) => (vec![ProbeCandidate::new(target, port, port)], port),
            None => (
                vec![
                    ProbeCandidate::new(target, HTTP_PORT, HTTP_PORT),
                    ProbeCandidate::new(target, HTTPS_PORT, HTTPS_PORT),
                ],
                HTTP_PORT,
            ),
        };

        let required = (!self.no_scripts)
            .then_some(&self.required_ports)
            .into_iter()
            .flatten()
            .map(move |&port| ProbeCandidate::new(target, port, canonical_port));

        defaults.into_iter().chain(required)
    }

    /// The deduplicated set of candidates for all targets.
    pub fn candidates<'a, I>(&self, targets: I) -> HashSet<ProbeCandidate>
    where
        I: IntoIterator<Item = &'a NormalizedTarget>,
    {
        targets
            .into_iter()
            .flat_map(|target| self.candidates_for(target))
            .collect()
    }
}
