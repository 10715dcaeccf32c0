//! Seam for collecting test reports at cycle boundaries

use async_trait::async_trait;
use conductor_exchange::DataServer;
use tracing::debug;

/// Fetches the reports a cycle left on the peers' data servers
///
/// Invoked once per cycle after the verdict, whatever the verdict was.
/// Failures are the downloader's own business and never affect the test.
#[async_trait]
pub trait ReportsDownloader: Send + Sync {
    async fn download(&self, cycle: u32, successful: bool, servers: &[DataServer]);
}

/// Downloader that only logs where the reports could be fetched from
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDownloader;

#[async_trait]
impl ReportsDownloader for NoopDownloader {
    async fn download(&self, cycle: u32, successful: bool, servers: &[DataServer]) {
        for server in servers {
            debug!(
                "Reports of test #{} ({}) are available from {} at {}",
                cycle,
                if successful { "passed" } else { "failed" },
                server.name,
                server.url
            );
        }
    }
}
