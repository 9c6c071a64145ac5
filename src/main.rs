use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use case_executor::redis_manager::RedisManager;
use case_executor::storage::{publish_or_local, publisher_from_env};
use case_executor::{ExecutionResultBuilder, ProcessSupervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("case_executor=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = SupervisorConfig::from_env()?;
    info!(
        "Starting Case Executor (log_dir={}, grace={:?}, kill_window={:?})",
        config.log_dir.display(),
        config.grace,
        config.kill_window
    );

    let mut redis = RedisManager::from_env().await?;

    let publisher = publisher_from_env().await?;

    let builder = ExecutionResultBuilder::new(config.reason_limit);
    let supervisor = ProcessSupervisor::new(config);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    info!("Waiting for jobs...");

    loop {
        let job = tokio::select! {
            job = redis.pop_job() => job?,
            _ = shutdown.cancelled() => break,
        };

        info!(
            "Received case job: task_id={}, test_case_id={}, round={}",
            job.task_id, job.test_case_id, job.round
        );

        let record = match job.to_request(supervisor.config().default_timeout) {
            Ok(request) => {
                let supervised = supervisor.execute(&request, shutdown.child_token()).await;
                for warning in &supervised.warnings {
                    warn!("Case {}: {}", request.identity.log_file_name(), warning);
                }

                let artifact =
                    publish_or_local(publisher.as_ref(), &supervised.artifact, &request.identity).await;
                builder.build(&request, &supervised.outcome, artifact.as_ref())
            }
            Err(e) => {
                error!("Rejected case job {}: {:#}", job.test_case_id, e);
                builder.rejected(&job.identity(), &format!("{:#}", e))
            }
        };

        if let Err(e) = redis.store_result(&record).await {
            error!("Failed to store case result: {}", e);
        }
        info!(
            "Case job completed: test_case_id={}, round={}, status={}, execution_time={}ms",
            record.test_case_id(),
            record.round(),
            record.status(),
            record.execution_time()
        );

        if shutdown.is_cancelled() {
            break;
        }
    }

    info!("Case Executor stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        shutdown.cancel();
    });

    Ok(())
}
