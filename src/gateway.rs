//! Campus network reachability probe.
//!
//! Every portal except the identity provider lives on hosts that only answer from inside the
//! campus network (or its VPN). Before talking to them we open plain TCP connections to a few
//! known internal hosts and require a majority to answer, so one host being down does not read
//! as "off campus".

use crate::config::ProbeConfig;
use crate::utils::fmt_duration;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, info};

/// Outcome of one probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub reachable: usize,
    pub total: usize,
}

impl ProbeReport {
    /// True when at least `threshold` of the probed hosts accepted a connection.
    pub fn meets(&self, threshold: f64) -> bool {
        self.total > 0 && self.reachable as f64 / self.total as f64 >= threshold
    }
}

#[derive(Debug, Clone)]
pub struct GatewayProbe {
    targets: Vec<(String, u16)>,
    threshold: f64,
    workers: usize,
}

impl GatewayProbe {
    /// `workers` is raised to the number of targets: every host must be probed at once for the
    /// whole probe to take a single timeout.
    pub fn new(targets: Vec<(String, u16)>, threshold: f64, workers: usize) -> Self {
        let workers = workers.max(targets.len()).max(1);
        Self {
            targets,
            threshold,
            workers,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        let targets = config
            .hosts
            .iter()
            .map(|host| (host.clone(), config.port))
            .collect();
        Self::new(targets, config.threshold, config.workers)
    }

    /// Connect to every target concurrently, each bounded by `timeout`, and count successes.
    ///
    /// Failures of any kind (refused, unreachable, timed out) just count as unreachable.
    pub async fn probe(&self, timeout: Duration) -> ProbeReport {
        let start = Instant::now();

        let reachable = futures::stream::iter(self.targets.iter())
            .map(|(host, port)| async move {
                let ok = matches!(
                    time::timeout(timeout, TcpStream::connect((host.as_str(), *port))).await,
                    Ok(Ok(_))
                );
                debug!(host, port, reachable = ok, "probed internal host");
                ok
            })
            .buffer_unordered(self.workers)
            .fold(0usize, |count, ok| async move { count + usize::from(ok) })
            .await;

        let report = ProbeReport {
            reachable,
            total: self.targets.len(),
        };
        info!(
            reachable = report.reachable,
            total = report.total,
            duration = fmt_duration(start.elapsed()),
            "campus network probe finished"
        );
        report
    }

    pub async fn is_internal_network_reachable(&self, timeout: Duration) -> bool {
        self.probe(timeout).await.meets(self.threshold)
    }
}
