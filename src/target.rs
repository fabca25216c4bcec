//! Normalizes raw target strings (URLs, bare hosts, `host:port`) into a
//! fixed-shape [`NormalizedTarget`].
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use url::{Host, Url};

/// Port implied by the `http` scheme.
pub const HTTP_PORT: u16 = 80;
/// Port implied by the `https` scheme.
pub const HTTPS_PORT: u16 = 443;

/// The scheme a target was given with, or `Unknown` for bare hosts.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
    Unknown,
}

impl Scheme {
    /// Infers the scheme from one of the two web ports.
    pub fn from_port(port: u16) -> Option<Self> {
        match port {
            HTTP_PORT => Some(Self::Http),
            HTTPS_PORT => Some(Self::Https),
            _ => None,
        }
    }

    /// Default port of the scheme, if it has one.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::Http => Some(HTTP_PORT),
            Self::Https => Some(HTTPS_PORT),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for Scheme {
    type Err = TargetError;

    /// Any scheme other than http/https is kept as `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "http" => Self::Http,
            "https" => Self::Https,
            _ => Self::Unknown,
        })
    }
}

/// Reasons a raw target is rejected before it reaches any network stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("empty target")]
    Empty,
    #[error("target {0:?} has no host")]
    MissingHost(String),
    #[error("invalid port {port:?} in target {target:?}")]
    InvalidPort { target: String, port: String },
    #[error("unparseable url {target:?}: {reason}")]
    InvalidUrl { target: String, reason: String },
}

/// A raw target broken into its parts.
///
/// If the scheme is http/https and no port was given, the port is the
/// scheme's default. If the port is 80 or 443 and the scheme is unknown,
/// the scheme is inferred from the port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedTarget {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl NormalizedTarget {
    /// Parses one raw target line. Surrounding whitespace and line endings
    /// are ignored.
    ///
    /// ```rust
    /// # use reconscan::target::{NormalizedTarget, Scheme};
    /// let target = NormalizedTarget::parse("https://example.com/login").unwrap();
    /// assert_eq!(target.scheme, Scheme::Https);
    /// assert_eq!(target.port, Some(443));
    /// assert_eq!(target.path, "/login");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(TargetError::Empty);
        }

        let (scheme, host, port, path) = if raw.contains("://") {
            parse_url(raw)?
        } else {
            let netloc = match raw.find('/') {
                Some(idx) if idx > 0 => &raw[..idx],
                _ => raw,
            };
            let (host, port) = split_host_port(raw, netloc)?;
            (Scheme::Unknown, host, port, String::new())
        };

        if host.is_empty() {
            return Err(TargetError::MissingHost(raw.to_owned()));
        }

        Ok(Self::with_inference(scheme, host, port, path))
    }

    fn with_inference(mut scheme: Scheme, host: String, mut port: Option<u16>, path: String) -> Self {
        if port.is_none() {
            port = scheme.default_port();
        }
        if scheme == Scheme::Unknown {
            if let Some(inferred) = port.and_then(Scheme::from_port) {
                scheme = inferred;
            }
        }

        Self {
            scheme,
            host,
            port,
            path,
        }
    }
}

impl FromStr for NormalizedTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits `host[:port]` on the last colon. A bare IPv6 address has no
/// port; a bracketed one (`[::1]:8080`) may carry one.
fn split_host_port(raw: &str, netloc: &str) -> Result<(String, Option<u16>), TargetError> {
    if Ipv6Addr::from_str(netloc).is_ok() {
        return Ok((netloc.to_owned(), None));
    }

    let (host, port) = match netloc.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
        Some((v6, "")) => return Ok((v6.to_owned(), None)),
        Some((v6, rest)) => match rest.strip_prefix(':') {
            Some(port) => (v6, port),
            None => return Err(TargetError::MissingHost(raw.to_owned())),
        },
        None => match netloc.rsplit_once(':') {
            Some(split) => split,
            None => return Ok((netloc.to_owned(), None)),
        },
    };

    let port = port
        .parse::<u16>()
        .ok()
        .filter(|&p| p != 0)
        .ok_or_else(|| TargetError::InvalidPort {
            target: raw.to_owned(),
            port: port.to_owned(),
        })?;

    Ok((host.to_owned(), Some(port)))
}

fn parse_url(raw: &str) -> Result<(Scheme, String, Option<u16>, String), TargetError> {
    // "://host" carries no scheme; treat it as http.
    let owned;
    let raw_url = if raw.starts_with("://") {
        owned = format!("http{raw}");
        owned.as_str()
    } else {
        raw
    };

    let url = Url::parse(raw_url).map_err(|e| match e {
        url::ParseError::InvalidPort => TargetError::InvalidPort {
            target: raw.to_owned(),
            port: explicit_port_text(raw_url).unwrap_or_default(),
        },
        other => TargetError::InvalidUrl {
            target: raw.to_owned(),
            reason: other.to_string(),
        },
    })?;

    let scheme = url.scheme().parse::<Scheme>()?;
    let host = match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => return Err(TargetError::MissingHost(raw.to_owned())),
    };

    // `Url::port` hides a port equal to the default of any scheme it knows
    // (ws, ftp, ...), so the port is read from the authority text instead.
    let port = explicit_port_text(raw_url).and_then(|port| port.parse::<u16>().ok());

    // A bare authority ("http://host") keeps an empty path.
    let after_scheme = &raw_url[raw_url.find("://").map_or(0, |i| i + 3)..];
    let path = if after_scheme.contains('/') {
        url.path().to_owned()
    } else {
        String::new()
    };

    Ok((scheme, host, port, path))
}

/// The port text of the URL's authority, if any, ignoring userinfo and the
/// colons inside a bracketed IPv6 host.
fn explicit_port_text(raw_url: &str) -> Option<String> {
    let authority = raw_url
        .split_once("://")?
        .1
        .split(['/', '?', '#'])
        .next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let host_port = host_port.rsplit_once(']').map_or(host_port, |(_, rest)| rest);
    host_port.rsplit_once(':').map(|(_, port)| port.to_owned())
}

#[cfg(test)]
mod tests {
    use super::{NormalizedTarget, Scheme, TargetError};
    use parameterized::parameterized;

    #[parameterized(input = {
        "http://10.0.0.1",
        "https://10.0.0.1",
        "http://10.0.0.1:8080",
        "https://example.com:80/admin",
        "10.0.0.1:443",
        "10.0.0.1:80",
        "10.0.0.1:8080",
    }, scheme = {
        Scheme::Http,
        Scheme::Https,
        Scheme::Http,
        Scheme::Https,
        Scheme::Https,
        Scheme::Http,
        Scheme::Unknown,
    }, port = {
        Some(80),
        Some(443),
        Some(8080),
        Some(80),
        Some(443),
        Some(80),
        Some(8080),
    })]
    fn scheme_and_port_inference(input: &str, scheme: Scheme, port: Option<u16>) {
        let target = NormalizedTarget::parse(input).unwrap();
        assert_eq!(target.scheme, scheme);
        assert_eq!(target.port, port);
    }

    #[test]
    fn bare_host_has_no_port_or_path() {
        let target = NormalizedTarget::parse("www.example.com/index.php\n").unwrap();
        assert_eq!(
            target,
            NormalizedTarget {
                scheme: Scheme::Unknown,
                host: "www.example.com".to_owned(),
                port: None,
                path: String::new(),
            }
        );
    }

    #[test]
    fn url_keeps_path_but_not_bare_authority_slash() {
        let with_path = NormalizedTarget::parse("http://example.com/a/b.html").unwrap();
        assert_eq!(with_path.path, "/a/b.html");

        let bare = NormalizedTarget::parse("http://example.com").unwrap();
        assert_eq!(bare.path, "");

        let slash = NormalizedTarget::parse("http://example.com/").unwrap();
        assert_eq!(slash.path, "/");
    }

    #[test]
    fn missing_scheme_defaults_to_http() {
        let target = NormalizedTarget::parse("://example.com").unwrap();
        assert_eq!(target.scheme, Scheme::Http);
        assert_eq!(target.port, Some(80));
    }

    #[test]
    fn other_schemes_are_unknown() {
        let target = NormalizedTarget::parse("ftp://files.example.com:2121").unwrap();
        assert_eq!(target.scheme, Scheme::Unknown);
        assert_eq!(target.port, Some(2121));
    }

    #[test]
    fn explicit_default_port_of_other_schemes_is_kept() {
        let ws = NormalizedTarget::parse("ws://h:80").unwrap();
        assert_eq!(ws.scheme, Scheme::Http);
        assert_eq!(ws.port, Some(80));

        let ftp = NormalizedTarget::parse("ftp://files.example.com:21/pub").unwrap();
        assert_eq!(ftp.scheme, Scheme::Unknown);
        assert_eq!(ftp.port, Some(21));
        assert_eq!(ftp.path, "/pub");

        let userinfo = NormalizedTarget::parse("https://user:pw@example.com").unwrap();
        assert_eq!(userinfo.host, "example.com");
        assert_eq!(userinfo.port, Some(443));
    }

    #[parameterized(input = {
        "::1",
        "2606:4700:3033::ac43:bd0d",
        "[::1]",
        "[::1]:8080",
        "http://[::1]",
        "http://[2606:4700:3033::ac43:bd0d]:8443/x",
    }, host = {
        "::1",
        "2606:4700:3033::ac43:bd0d",
        "::1",
        "::1",
        "::1",
        "2606:4700:3033::ac43:bd0d",
    }, port = {
        None,
        None,
        None,
        Some(8080),
        Some(80),
        Some(8443),
    })]
    fn ipv6_hosts_are_not_split_on_colons(input: &str, host: &str, port: Option<u16>) {
        let target = NormalizedTarget::parse(input).unwrap();
        assert_eq!(target.host, host);
        assert_eq!(target.port, port);
    }

    #[test]
    fn malformed_targets_are_rejected() {
        assert_eq!(NormalizedTarget::parse("   "), Err(TargetError::Empty));
        assert!(matches!(
            NormalizedTarget::parse("10.0.0.1:http"),
            Err(TargetError::InvalidPort { .. })
        ));
        assert!(matches!(
            NormalizedTarget::parse("10.0.0.1:70000"),
            Err(TargetError::InvalidPort { .. })
        ));
        assert!(matches!(
            NormalizedTarget::parse(":8080"),
            Err(TargetError::MissingHost(_))
        ));
        assert!(NormalizedTarget::parse("http://exa mple.com").is_err());
    }
}
