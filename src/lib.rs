//! This crate exposes the target discovery and liveness probing pipeline
//! of the reconscan reconnaissance tool.
//!
//! Given a mixed list of URLs, hostnames and IP addresses, the pipeline
//! normalizes them, resolves their hosts, optionally expands resolved
//! addresses to their network, probes every candidate (host, port) pair for
//! TCP liveness and folds the results into one [`TargetRecord`] per live
//! host, ready for a scan engine to consume.
//!
//! ## Architecture Overview
//!
//! 1. **Normalization**: [`target`] splits raw input into scheme, host,
//!    port and path.
//! 2. **Resolution**: [`address`] resolves every input concurrently and
//!    drops the ones that do not resolve.
//! 3. **Expansion**: [`subnet`] adds the hosts of each address's network
//!    when a mask narrower than /32 is configured.
//! 4. **Candidates**: [`port_strategy`] decides which ports each target
//!    needs probed.
//! 5. **Probing**: [`scanner`] connects to every candidate under a
//!    bounded admission gate.
//! 6. **Aggregation**: [`aggregate`] merges open ports and third-party
//!    assets per host and picks the canonical scheme and port.
//!
//! [`pipeline`] sequences the stages and publishes the records;
//! [`dispatch`] is the boundary to the per-target scan engine.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use reconscan::pipeline::{Pipeline, PipelineConfig};
//! use tokio::sync::mpsc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let targets = vec!["https://example.com".to_owned(), "10.0.0.1:8080".to_owned()];
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!
//!     Pipeline::new(PipelineConfig::default())?.run(&targets, &tx)?;
//!     drop(tx);
//!
//!     while let Ok(record) = rx.try_recv() {
//!         println!("{} {:?} {:?}", record.host, record.port, record.ports_open);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`TargetRecord`]: crate::aggregate::TargetRecord
#![allow(clippy::needless_doctest_main)]

pub mod target;

pub mod port_strategy;

pub mod address;

pub mod subnet;

pub mod scanner;

pub mod aggregate;

pub mod pipeline;

pub mod dispatch;

pub mod input;
