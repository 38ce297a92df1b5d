//! Pod Creation Pipeline - pull and create containers in declaration order.

use super::broadcaster::{BroadcastSummary, ProgressBroadcaster, ProgressSink};
use crate::error::{Error, Result};
use crate::model::PodSpec;
use crate::progress::ProgressTracker;
use crate::runtime::RuntimeClient;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Pull the image and create the container for every container of `pod`.
///
/// Stops at the first failure. Containers created before the failure are
/// left in place and containers after it never reach the tracker.
pub async fn create_pod(
    runtime: &dyn RuntimeClient,
    tracker: &ProgressTracker,
    pod: &PodSpec,
) -> Result<()> {
    for container in &pod.containers {
        let progress = tracker.begin(&container.name, &container.image);

        info!(
            "Pipeline: Pulling {} for {}/{}",
            container.image, pod.name, container.name
        );
        runtime
            .pull_image(&pod.namespace, &container.image, &progress)
            .await
            .map_err(|source| Error::PullImage {
                image: container.image.clone(),
                source,
            })?;
        progress.all_done();

        runtime
            .create_container(pod, container)
            .await
            .map_err(|source| Error::CreateContainer {
                container: container.name.clone(),
                source,
            })?;
        info!("Pipeline: Created {}/{}", pod.name, container.name);
    }
    Ok(())
}

/// Run the pipeline for `pod` while a broadcaster streams its progress into
/// `sink`.
///
/// The final snapshot has been handed to `sink` by the time this returns.
pub async fn run_create<S>(
    runtime: Arc<dyn RuntimeClient>,
    pod: PodSpec,
    sink: S,
    interval: Duration,
    operation_id: &str,
) -> (Result<()>, BroadcastSummary)
where
    S: ProgressSink + 'static,
{
    let tracker = ProgressTracker::new();
    let (done_tx, done_rx) = oneshot::channel();
    let broadcaster = ProgressBroadcaster::new(tracker.clone(), sink, interval, operation_id);
    let reporting = tokio::spawn(broadcaster.run(done_rx));

    let result = create_pod(runtime.as_ref(), &tracker, &pod).await;
    let _ = done_tx.send(());

    let summary = match reporting.await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Pipeline: Broadcaster of operation {} failed: {}", operation_id, e);
            BroadcastSummary::default()
        }
    };
    (result, summary)
}
