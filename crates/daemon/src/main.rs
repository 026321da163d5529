// SPDX-License-Identifier: MIT

//! peerbotd: dispatcher + orchestrator daemon.
//!
//! Chat events arrive as NDJSON on stdin from the platform connector;
//! everything else is queue- and cluster-driven. SIGTERM/SIGINT drain
//! consumers and stop the schedulers.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use peerbot_chat::{EgressConsumer, SlackClient};
use peerbot_cluster::{
    ClusterApi, IdleScaler, KubeCluster, OrphanSweeper, Reconciler, ReconcilerConfig, SweepConfig,
};
use peerbot_core::SystemClock;
use peerbot_daemon::dispatcher::{ChatEvent, Dispatcher, DispatcherConfig, MESSAGES_QUEUE};
use peerbot_daemon::lifecycle::Schedulers;
use peerbot_daemon::orchestrator::cleanup::cleanup_thread_queues;
use peerbot_daemon::orchestrator::{CredentialStore, Orchestrator};
use peerbot_daemon::{env, DaemonConfig};
use peerbot_queue::{PgQueue, Queue, WorkOptions};
use peerbot_store::{CachedRepoDirectory, ConversationStore, PgConversationStore, PgRoles, TemplateHosting};

#[tokio::main]
async fn main() {
    let _log_guard = init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "daemon startup failed");
        std::process::exit(1);
    }
}

/// Console logging by default; a rolling file when `PEERBOT_LOG_DIR` is
/// set. The guard must live for the process lifetime.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match env::optional("PEERBOT_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "peerbotd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_env()?;
    let clock = SystemClock;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let queue = PgQueue::new(pool.clone());
    queue.ensure_schema().await?;
    peerbot_store::ensure_schema(&pool).await?;

    let cluster = KubeCluster::connect(config.manifest.namespace.clone()).await?;
    let chat = Arc::new(SlackClient::new(config.slack_bot_token.clone()));
    let conversations: Arc<dyn ConversationStore> =
        Arc::new(PgConversationStore::new(pool.clone()));

    let repo_template = env::optional("PEERBOT_REPO_URL_TEMPLATE")
        .unwrap_or_else(|| "https://github.com/peerbot-workspaces/{username}".to_string());
    let repos = Arc::new(CachedRepoDirectory::new(
        Arc::new(TemplateHosting::new(repo_template)),
        clock.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        DispatcherConfig {
            bot_user_id: config.bot_user_id.clone(),
            bot_id: config.bot_id.clone(),
            allow_list: config.allow_list.clone(),
            deny_list: config.deny_list.clone(),
            ..DispatcherConfig::default()
        },
        chat.clone(),
        Arc::new(queue.clone()),
        conversations.clone(),
        repos,
        clock.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        cluster.clone(),
        clock.clone(),
        ReconcilerConfig::default(),
        config.manifest.clone(),
    ));
    let credentials = Arc::new(CredentialStore::new(
        PgRoles::new(pool.clone()),
        cluster.clone(),
        config.user_database_url_template.clone(),
    ));
    let idle = Arc::new(IdleScaler::new(
        cluster.clone(),
        clock.clone(),
        env::idle_after(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(queue.clone()),
        reconciler,
        credentials,
        conversations.clone(),
        idle.clone(),
    ));
    let orchestrator_work = queue
        .work(MESSAGES_QUEUE, WorkOptions::default(), orchestrator)
        .await?;

    let egress = Arc::new(EgressConsumer::new(chat.clone()));
    let egress_work = queue
        .work(
            peerbot_chat::egress::THREAD_RESPONSE_QUEUE,
            WorkOptions::default(),
            egress,
        )
        .await?;

    // Rebuild the advisory activity map from the cluster before the idle
    // scaler's first sweep can park a busy thread.
    match cluster
        .list_deployments(peerbot_cluster::SELECTOR_WORKERS)
        .await
    {
        Ok(views) => {
            info!(count = views.len(), "seeded deployment cache from cluster");
            for view in views {
                idle.record_activity(&view.name);
            }
        }
        Err(e) => warn!(error = %e, "startup deployment listing failed"),
    }

    let mut schedulers = Schedulers::new();

    {
        let dispatcher = dispatcher.clone();
        schedulers.spawn_periodic(
            "rate-limit-eviction",
            env::rate_limit_eviction_interval(),
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    let evicted = dispatcher.rate_limiter().evict_expired();
                    let pruned = dispatcher.sessions().prune_terminal();
                    if evicted + pruned > 0 {
                        info!(evicted, pruned, "swept dispatcher state");
                    }
                }
            },
        );
    }

    {
        let sweeper = Arc::new(OrphanSweeper::new(
            cluster.clone(),
            clock.clone(),
            SweepConfig::default(),
        ));
        let conversations = conversations.clone();
        schedulers.spawn_periodic("orphan-recovery", env::recovery_interval(), move || {
            let sweeper = sweeper.clone();
            let conversations = conversations.clone();
            async move {
                let active: HashSet<String> = match conversations.list_active_keys().await {
                    Ok(keys) => keys.into_iter().collect(),
                    Err(e) => {
                        warn!(error = %e, "active key listing failed, assuming none");
                        HashSet::new()
                    }
                };
                match sweeper.run_once(&active).await {
                    Ok(reports) if !reports.is_empty() => {
                        info!(recovered = reports.len(), "orphan recovery pass");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "orphan recovery failed"),
                }
            }
        });
    }

    {
        let idle = idle.clone();
        schedulers.spawn_periodic("idle-scaling", env::idle_sweep_interval(), move || {
            let idle = idle.clone();
            async move {
                match idle.run_once().await {
                    Ok(scaled) if !scaled.is_empty() => {
                        info!(scaled = scaled.len(), "parked idle deployments");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "idle sweep failed"),
                }
            }
        });
    }

    {
        let queue = queue.clone();
        schedulers.spawn_periodic("queue-maintenance", env::maintenance_interval(), move || {
            let queue = queue.clone();
            async move {
                if let Err(e) = queue.maintain().await {
                    warn!(error = %e, "queue maintenance failed");
                }
            }
        });
    }

    {
        let queue = queue.clone();
        let cluster = cluster.clone();
        schedulers.spawn_periodic("thread-queue-cleanup", env::cleanup_interval(), move || {
            let queue = queue.clone();
            let cluster = cluster.clone();
            async move {
                if let Err(e) = cleanup_thread_queues(&queue, &cluster).await {
                    warn!(error = %e, "thread queue cleanup failed");
                }
            }
        });
    }

    info!("peerbotd ready");

    // Event loop: NDJSON chat events on stdin until EOF or a signal.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("termination signal received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        let event: ChatEvent = match serde_json::from_str(&line) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "unparseable event line");
                                continue;
                            }
                        };
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = dispatcher.handle_event(&event).await {
                                warn!(error = %e, "event dispatch failed");
                            }
                        });
                    }
                    Ok(None) => {
                        info!("event stream closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "event stream read failed");
                        break;
                    }
                }
            }
        }
    }

    orchestrator_work.stop().await;
    egress_work.stop().await;
    schedulers.shutdown().await;
    info!("daemon shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}
