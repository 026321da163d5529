// SPDX-License-Identifier: MIT

//! Advisory cleanup: drop thread queues whose deployment is gone.
//!
//! The cluster is authoritative; this timer only garbage-collects queue
//! names left behind after workers deleted themselves. Running it late or
//! never costs storage, not correctness.

use peerbot_cluster::{ClusterApi, SELECTOR_WORKERS};
use peerbot_queue::Queue;

use super::OrchestrateError;

const THREAD_QUEUE_PREFIX: &str = "thread_message_";

/// One cleanup pass. Returns the names of dropped queues.
pub async fn cleanup_thread_queues<A: ClusterApi>(
    queue: &dyn Queue,
    cluster: &A,
) -> Result<Vec<String>, OrchestrateError> {
    let deployments: std::collections::HashSet<String> = cluster
        .list_deployments(SELECTOR_WORKERS)
        .await?
        .into_iter()
        .map(|d| d.name)
        .collect();

    let mut dropped = Vec::new();
    for name in queue.list_queues().await? {
        let Some(deployment) = name.strip_prefix(THREAD_QUEUE_PREFIX) else {
            continue;
        };
        if !deployments.contains(deployment) {
            tracing::info!(queue = %name, "dropping thread queue for deleted deployment");
            queue.delete_queue(&name).await?;
            dropped.push(name);
        }
    }
    Ok(dropped)
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;
