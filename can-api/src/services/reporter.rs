//! State Reporter - periodically logs how many pods each namespace holds.

use crate::runtime::{Result, RuntimeClient};
use log::{error, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest pause between two reports.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct StateReporter {
    runtime: Arc<dyn RuntimeClient>,
    interval: Duration,
}

impl StateReporter {
    pub fn new(runtime: Arc<dyn RuntimeClient>, interval: Duration) -> Self {
        Self {
            runtime,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Poll every namespace once and log its pod count.
    ///
    /// A namespace whose pods cannot be listed is logged and left out.
    pub async fn report_once(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for namespace in self.runtime.namespaces().await? {
            match self.runtime.get_pods(&namespace).await {
                Ok(pods) => {
                    info!("{} state update: {} pods", namespace, pods.len());
                    counts.insert(namespace, pods.len());
                }
                Err(e) => error!("Reporter: Failed to list pods in {}: {}", namespace, e),
            }
        }
        Ok(counts)
    }

    pub async fn run(self) {
        loop {
            if let Err(e) = self.report_once().await {
                error!("Reporter: Failed to list namespaces: {}", e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
