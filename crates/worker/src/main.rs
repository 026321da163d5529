// SPDX-License-Identifier: MIT

//! peerbot-worker: per-thread worker entrypoint.
//!
//! Exit codes: 0 on clean shutdown (idle or drained SIGTERM), 1 on
//! startup misconfiguration, anything else is a crash and the cluster
//! restart policy applies.

use std::sync::Arc;

use tracing::{error, info};

use peerbot_agent::ProcessAgent;
use peerbot_chat::SlackClient;
use peerbot_cluster::KubeCluster;
use peerbot_core::SystemClock;
use peerbot_queue::PgQueue;
use peerbot_store::PgConversationStore;
use peerbot_worker::{GitWorkspace, WorkerConfig, WorkerConsumer, WorkerExit};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "worker misconfigured");
            std::process::exit(1);
        }
    };

    match run(config).await {
        Ok(exit) => {
            info!(?exit, "worker shutdown complete");
        }
        Err(e) => {
            error!(error = %e, "worker failed");
            std::process::exit(2);
        }
    }
}

async fn run(config: WorkerConfig) -> Result<WorkerExit, Box<dyn std::error::Error>> {
    let clock = SystemClock;

    // The pool runs under the per-user role; every connection it opens
    // carries the RLS session variable for this user.
    let pool = peerbot_store::connect_user_pool(&config.database_url, &config.user_id, 2).await?;

    let queue = PgQueue::new(pool.clone());
    let chat = Arc::new(SlackClient::new(
        std::env::var("SLACK_BOT_TOKEN").unwrap_or_default(),
    ));
    let conversations = Arc::new(PgConversationStore::new(pool.clone()));
    let namespace =
        std::env::var("PEERBOT_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let cluster = Arc::new(KubeCluster::connect(namespace).await?);

    let agent = Arc::new(
        ProcessAgent::new(
            std::env::var("AGENT_COMMAND").unwrap_or_else(|_| "claude".to_string()),
        )
        .with_token(config.agent_token.clone()),
    );
    let workspace = Arc::new(GitWorkspace::new(
        &config.workspace_path,
        config.username.clone(),
        config.repository_url.clone(),
        config.hosting_token.clone(),
    ));

    let consumer = Arc::new(WorkerConsumer::new(
        config,
        Arc::new(queue),
        chat,
        conversations,
        cluster,
        agent,
        workspace,
        clock,
    ));

    // SIGTERM/SIGINT initiate graceful shutdown
    let shutdown = consumer.shutdown_token();
    tokio::spawn(async move {
        let terminate = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
                }
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        info!("termination signal received");
        shutdown.cancel();
    });

    let exit = consumer.run().await?;
    Ok(exit)
}
