//! Resolves target hostnames, splitting the input into resolvable targets
//! (kept for scanning) and unresolvable ones (logged and dropped).

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::{debug, error, warn};
use tokio::fs;
use tokio::io;
use tokio::sync::mpsc;

use crate::target::{NormalizedTarget, TargetError, HTTP_PORT};

/// What the resolution stage keeps: the raw targets whose host resolved,
/// and every address those hosts resolved to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedTargets {
    pub targets: Vec<String>,
    pub ips: Vec<String>,
}

/// Looks hosts up with the system resolver first, then with an optional
/// DNS-server-backed resolver.
#[derive(Clone)]
pub struct DomainResolver {
    backup: Option<TokioAsyncResolver>,
}

impl std::fmt::Debug for DomainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainResolver")
            .field("backup", &self.backup.is_some())
            .finish()
    }
}

impl DomainResolver {
    /// Only the system resolver is consulted.
    pub fn system_only() -> Self {
        Self { backup: None }
    }

    /// System resolver plus a backup built by [`get_resolver`].
    pub async fn with_backup(resolver: Option<&str>) -> Self {
        Self {
            backup: Some(get_resolver(resolver).await),
        }
    }

    /// Resolves `host`, returning `None` when no resolver knows it.
    pub async fn lookup(&self, host: &str, port: u16) -> Option<Vec<IpAddr>> {
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if let Ok(addrs) = tokio::net::lookup_host((host, port)).await {
            let ips = addrs.map(|addr| addr.ip()).unique().collect_vec();
            if !ips.is_empty() {
                return Some(ips);
            }
        }

        if let Some(backup) = &self.backup {
            if let Ok(lookup) = backup.lookup_ip(host).await {
                let ips = lookup.iter().unique().collect_vec();
                if !ips.is_empty() {
                    return Some(ips);
                }
            }
        }

        None
    }

    async fn resolve(&self, raw: String) -> Resolution {
        let target = match NormalizedTarget::parse(&raw) {
            Ok(target) => target,
            Err(e) => return Resolution::Rejected(raw, e),
        };
        let port = target
            .scheme
            .default_port()
            .or(target.port)
            .unwrap_or(HTTP_PORT);

        match self.lookup(&target.host, port).await {
            Some(ips) => Resolution::Resolved(raw, ips),
            None => Resolution::Unresolvable(raw),
        }
    }
}

enum Resolution {
    Resolved(String, Vec<IpAddr>),
    Unresolvable(String),
    Rejected(String, TargetError),
}

/// Resolves every raw target concurrently, without a concurrency cap.
///
/// Each lookup runs in its own task and reports back over a channel; the
/// collector below is the only owner of the accumulated lists. Returns once
/// every lookup has either succeeded or failed.
///
/// ```rust
/// # use reconscan::address::{resolve_targets, DomainResolver};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let targets = vec!["127.0.0.1".to_owned()];
/// let resolved = resolve_targets(&targets, &DomainResolver::system_only()).await;
/// assert_eq!(resolved.ips, vec!["127.0.0.1".to_owned()]);
/// # }
/// ```
pub async fn resolve_targets(raw_targets: &[String], resolver: &DomainResolver) -> ResolvedTargets {
    let resolver = Arc::new(resolver.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    for raw in raw_targets {
        let raw = raw.trim().to_owned();
        let tx = tx.clone();
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move {
            // The collector outlives every sender.
            let _ = tx.send(resolver.resolve(raw).await);
        });
    }
    drop(tx);

    let mut resolved = ResolvedTargets::default();
    while let Some(resolution) = rx.recv().await {
        match resolution {
            Resolution::Resolved(raw, ips) => {
                resolved.targets.push(raw);
                resolved.ips.extend(ips.iter().map(ToString::to_string));
            }
            Resolution::Unresolvable(raw) => error!("Invalid domain: {raw}"),
            Resolution::Rejected(raw, e) => warn!("Skipping target {raw:?}: {e}"),
        }
    }

    debug!(
        "Valid targets: {:?} and valid ips: {:?}",
        resolved.targets, resolved.ips
    );
    resolved
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
pub async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => parse_resolver_ips(r),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

fn parse_resolver_ips(list: &str) -> Vec<IpAddr> {
    list.split(',')
        .filter_map(|r| IpAddr::from_str(r.trim()).ok())
        .collect()
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::{parse_resolver_ips, resolve_targets, DomainResolver};
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn resolves_ip_literals_and_urls() {
        let targets = vec![
            "127.0.0.1".to_owned(),
            "http://127.0.0.1:8080/admin\n".to_owned(),
        ];
        let resolved = resolve_targets(&targets, &DomainResolver::system_only()).await;

        let mut kept = resolved.targets.clone();
        kept.sort();
        assert_eq!(kept, ["127.0.0.1", "http://127.0.0.1:8080/admin"]);
        assert_eq!(resolved.ips, ["127.0.0.1", "127.0.0.1"]);
    }

    #[tokio::test]
    async fn unresolvable_domain_is_dropped() {
        let targets = vec![
            "127.0.0.1".to_owned(),
            "nonexistent.invalid".to_owned(),
        ];
        let resolved = resolve_targets(&targets, &DomainResolver::system_only()).await;

        assert_eq!(resolved.targets, ["127.0.0.1"]);
        assert_eq!(resolved.ips, ["127.0.0.1"]);
    }

    #[tokio::test]
    async fn malformed_target_is_dropped() {
        let targets = vec!["127.0.0.1:notaport".to_owned(), "  ".to_owned()];
        let resolved = resolve_targets(&targets, &DomainResolver::system_only()).await;

        assert!(resolved.targets.is_empty());
        assert!(resolved.ips.is_empty());
    }

    #[tokio::test]
    async fn empty_input_resolves_nothing() {
        let resolved = resolve_targets(&[], &DomainResolver::system_only()).await;
        assert_eq!(resolved, Default::default());
    }

    #[test]
    fn resolver_list_skips_garbage() {
        let ips = parse_resolver_ips("8.8.8.8, not-an-ip,1.1.1.1");
        assert_eq!(
            ips,
            [
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
            ]
        );
    }
}
