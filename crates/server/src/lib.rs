//! Queue service composition root: storage, transport, broker, worker
//! pool, and sweeper, wired from environment configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mailspool_infra::{
    connect_pool, run_migrations, spawn_pool, Broker, Config, MailTransport, PgTaskStore,
    PgUserStore, RedisTransport, SmtpMailer, Sweeper, SweeperConfig, TaskService, TaskStore,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Build the enqueue façade over the Postgres stores.
///
/// For embedders that run [`run`] in one process and enqueue from another
/// component sharing the same database and queue.
pub async fn enqueue_service(config: &Config) -> anyhow::Result<TaskService> {
    let pool = connect_pool(&config.database)
        .await
        .context("database connection failed")?;
    let transport = RedisTransport::connect(&config.redis.url())
        .await
        .context("redis connection failed")?;

    // This broker only publishes; its channel is never consumed.
    let (task_tx, _task_rx) = tokio::sync::mpsc::channel(1);
    let broker = Broker::new(
        Arc::new(transport),
        config.queue.queue_name.clone(),
        config.queue.consumer_count,
        task_tx,
    );

    Ok(TaskService::new(
        Arc::new(PgTaskStore::new(pool.clone())),
        Arc::new(PgUserStore::new(pool)),
        broker,
    ))
}

/// Run the queue service until SIGINT or consumer failure.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let pool = connect_pool(&config.database)
        .await
        .context("database connection failed")?;
    run_migrations(&pool).await.context("migrations failed")?;

    let task_store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool));

    let transport = RedisTransport::connect(&config.redis.url())
        .await
        .context("redis connection failed")?;

    let (task_tx, task_rx) = tokio::sync::mpsc::channel(config.queue.channel_capacity);
    let broker = Broker::new(
        Arc::new(transport),
        config.queue.queue_name.clone(),
        config.queue.consumer_count,
        task_tx,
    );

    let shutdown = CancellationToken::new();

    // Republish tasks stranded by a previous crash before consumers start,
    // so recovery is not delayed by a full sweep interval.
    let sweeper = Sweeper::new(
        Arc::clone(&task_store),
        broker.clone(),
        SweeperConfig {
            stale_after: config.queue.stale_after,
            interval: config.queue.sweep_interval,
        },
    );
    let recovered = sweeper.sweep(&shutdown).await;
    if recovered > 0 {
        info!(count = recovered, "recovered stale tasks at startup");
    }

    let mut consumer_errors = broker.start_consume(shutdown.clone());

    let mailer: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new());
    let workers = spawn_pool(
        config.queue.worker_count,
        Arc::clone(&task_store),
        broker.clone(),
        Arc::clone(&mailer),
        task_rx,
        shutdown.clone(),
        config.queue.max_try_count,
    );

    let sweeper_handle = sweeper.spawn(shutdown.clone());

    info!(
        queue = %config.queue.queue_name,
        consumers = config.queue.consumer_count,
        workers = config.queue.worker_count,
        "mail queue service started"
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
        }
        failure = consumer_errors.recv() => {
            match failure {
                Some(err) => error!(error = %err, "queue consumer failed"),
                None => error!("all queue consumers exited"),
            }
        }
    }

    shutdown.cancel();

    for handle in workers {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(exit)) => info!(?exit, "worker stopped"),
            Ok(Err(err)) => warn!(error = %err, "worker task panicked"),
            Err(_) => warn!("worker did not stop within the grace period"),
        }
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, sweeper_handle)
        .await
        .is_err()
    {
        warn!("sweeper did not stop within the grace period");
    }

    info!("mail queue service stopped");
    Ok(())
}
