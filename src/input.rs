//! Provides a means to read, parse and hold configuration options for runs.
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_derive::Deserialize;

use crate::pipeline::{AssetCredentials, PipelineConfig};

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

pub type Ports = Vec<u16>;

#[cfg(not(tarpaulin_include))]
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 8000-8010.",
        ));
    }

    let start: u16 = range_parts[0].parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "reconscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Target discovery and liveness probing.
/// Normalizes URLs, hosts and IPs, probes them for open web ports and
/// prints one JSON record per live host.
pub struct Opts {
    /// A comma-delimited list of URLs, hosts, host:port pairs or IPs.
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// A newline-delimited file of targets. Blank lines and '#' comments are skipped.
    #[arg(short, long, value_parser)]
    pub file: Option<PathBuf>,

    /// Do not probe the ports required by scan scripts.
    #[arg(long)]
    pub no_scripts: bool,

    /// Ports the scan scripts need probed on every target. Examples: 3306,6379 or 8000-8010
    #[arg(short = 'p', long, value_parser = parse_ports_and_ranges)]
    pub required_ports: Option<Ports>,

    /// Drop addresses fronted by a CDN before expanding and probing.
    /// Needs a CDN filter wired in through the library; the binary alone only warns.
    #[arg(long)]
    pub check_cdn: bool,

    /// Mask width used to expand every resolved address to its network. 32 disables expansion.
    #[arg(short, long, default_value = "32", value_parser = clap::value_parser!(u8).range(0..=32))]
    pub network: u8,

    /// How many probes may be in flight at once. Depends on the open file limit of your OS.
    #[arg(short, long, default_value = "1000")]
    pub batch_size: usize,

    /// The timeout in milliseconds before a port is assumed to be closed.
    #[arg(short, long, default_value = "10000")]
    pub timeout: u64,

    /// A comma-delimited list or file of DNS resolvers used when the system resolver fails.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Account e-mail for the third-party asset search.
    /// Needs an asset search client wired in through the library; the binary alone only warns.
    #[arg(long)]
    pub asset_email: Option<String>,

    /// API key for the third-party asset search.
    /// Needs an asset search client wired in through the library; the binary alone only warns.
    #[arg(long)]
    pub asset_key: Option<String>,

    /// Whether to ignore the configuration file or not.
    #[arg(long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merge values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(addresses, no_scripts, check_cdn, network, batch_size, timeout);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(required_ports, resolver, asset_email, asset_key, ulimit);
    }

    /// Asset search credentials, present only when both halves are set.
    pub fn asset_credentials(&self) -> Option<AssetCredentials> {
        match (&self.asset_email, &self.asset_key) {
            (Some(email), Some(key)) if !email.is_empty() && !key.is_empty() => {
                Some(AssetCredentials {
                    email: email.clone(),
                    key: key.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            no_scripts: self.no_scripts,
            required_ports: self.required_ports.clone().unwrap_or_default(),
            check_cdn: self.check_cdn,
            network: self.network,
            batch_size: self.batch_size,
            timeout: Duration::from_millis(self.timeout),
            asset_credentials: self.asset_credentials(),
        }
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addresses: vec![],
            file: None,
            no_scripts: false,
            required_ports: None,
            check_cdn: false,
            network: 32,
            batch_size: 1000,
            timeout: 10_000,
            resolver: None,
            asset_email: None,
            asset_key: None,
            no_config: true,
            config_path: None,
            ulimit: None,
            no_progress: false,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    no_scripts: Option<bool>,
    required_ports: Option<Vec<u16>>,
    check_cdn: Option<bool>,
    network: Option<u8>,
    batch_size: Option<usize>,
    timeout: Option<u64>,
    resolver: Option<String>,
    asset_email: Option<String>,
    asset_key: Option<String>,
    ulimit: Option<u64>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty config.
    ///
    /// # Format
    ///
    /// addresses = ["https://example.com", "10.0.0.1:8080"]
    /// required_ports = [3306, 6379]
    /// network = 24
    /// batch_size = 500
    /// asset_email = "me@example.com"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match custom_config_path {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid configuration file {}", config_path.display()))
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".reconscan.toml");
    Some(config_path)
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use parameterized::parameterized;
    use std::time::Duration;

    use super::{parse_ports_and_ranges, Config, Opts};

    fn config() -> Config {
        Config {
            addresses: Some(vec!["https://example.com".to_owned()]),
            no_scripts: Some(true),
            required_ports: Some(vec![3306]),
            check_cdn: Some(true),
            network: Some(24),
            batch_size: Some(250),
            timeout: Some(2_000),
            resolver: Some("1.1.1.1".to_owned()),
            asset_email: Some("me@example.com".to_owned()),
            asset_key: Some("secret".to_owned()),
            ulimit: None,
        }
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[parameterized(input = {
        vec!["reconscan", "--addresses", "10.0.0.1"],
        vec!["reconscan", "-a", "10.0.0.1,https://example.com"],
        vec!["reconscan", "-a", "example.com", "-n", "24", "-p", "3306,8000-8001"],
    }, addresses = {
        vec!["10.0.0.1"],
        vec!["10.0.0.1", "https://example.com"],
        vec!["example.com"],
    })]
    fn parse_addresses(input: Vec<&str>, addresses: Vec<&str>) {
        let opts = Opts::parse_from(input);
        assert_eq!(opts.addresses, addresses);
    }

    #[test]
    fn network_out_of_range_is_rejected() {
        assert!(Opts::try_parse_from(["reconscan", "-n", "33"]).is_err());
    }

    #[test]
    fn defaults_match_pipeline_defaults() {
        let opts = Opts::parse_from(["reconscan"]);
        let config = opts.pipeline_config();

        assert_eq!(config.network, 32);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.required_ports.is_empty());
        assert!(config.asset_credentials.is_none());
    }

    #[test]
    fn opts_no_merge_when_config_is_ignored() {
        let mut opts = Opts::default();
        opts.merge(&config());

        assert!(opts.addresses.is_empty());
        assert!(!opts.no_scripts);
        assert_eq!(opts.network, 32);
        assert!(opts.resolver.is_none());
    }

    #[test]
    fn opts_merge_required_arguments() {
        let mut opts = Opts::default();
        let config = config();

        opts.merge_required(&config);

        assert_eq!(opts.addresses, config.addresses.unwrap());
        assert_eq!(opts.no_scripts, config.no_scripts.unwrap());
        assert_eq!(opts.check_cdn, config.check_cdn.unwrap());
        assert_eq!(opts.network, config.network.unwrap());
        assert_eq!(opts.batch_size, config.batch_size.unwrap());
        assert_eq!(opts.timeout, config.timeout.unwrap());
    }

    #[test]
    fn opts_merge_optional_arguments() {
        let mut opts = Opts::default();
        opts.required_ports = Some(vec![22]);
        let config = Config {
            required_ports: None,
            ..config()
        };

        opts.merge_optional(&config);

        assert_eq!(opts.required_ports, Some(vec![22]));
        assert_eq!(opts.resolver, config.resolver);
        assert_eq!(
            opts.asset_credentials().map(|c| c.key),
            Some("secret".to_owned())
        );
    }

    #[test]
    fn half_credentials_disable_asset_search() {
        let opts = Opts {
            asset_email: Some("me@example.com".to_owned()),
            ..Opts::default()
        };
        assert!(opts.asset_credentials().is_none());
    }

    #[test]
    fn config_parses_from_toml() {
        let config: Config = toml::from_str("network = 24\nrequired_ports = [3306]\n").unwrap();
        assert_eq!(config.network, Some(24));
        assert_eq!(config.required_ports, Some(vec![3306]));
    }

    #[test]
    fn test_parse_ports_and_ranges_mixed_ports_and_ranges() {
        let result = parse_ports_and_ranges("80, 443,1-3,8080");
        assert_eq!(result, Ok(vec![1, 2, 3, 80, 443, 8080]));
    }

    #[test]
    fn test_parse_ports_and_ranges_duplicates() {
        let result = parse_ports_and_ranges("3306,3306,6379");
        assert_eq!(result, Ok(vec![3306, 6379]));
    }

    #[test]
    fn test_parse_ports_and_ranges_empty_input() {
        let result = parse_ports_and_ranges("");
        assert!(result
            .unwrap_err()
            .contains("No valid ports or ranges provided"));
    }

    #[test]
    fn test_parse_ports_and_ranges_invalid_range_format() {
        let result = parse_ports_and_ranges("80,1-2-3,443");
        assert!(result
            .unwrap_err()
            .contains("Invalid range format '1-2-3'. Expected 'start-end'"));
    }

    #[test]
    fn test_parse_ports_and_ranges_reverse_range() {
        let result = parse_ports_and_ranges("80,5-1,443");
        assert!(result
            .unwrap_err()
            .contains("Start port 5 is greater than end port 1 in range '5-1'"));
    }

    #[test]
    fn test_parse_ports_and_ranges_zero_port() {
        let result = parse_ports_and_ranges("80,0,443");
        assert!(result
            .unwrap_err()
            .contains("Port 0 must be between 1 and 65535"));
    }
}
