use std::sync::Arc;

use agri_sync::{IntelligencePipeline, JobKind, PipelineConfig};
use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Registers one cron job per pipeline entry point. Returns `None` when disabled.
pub async fn build_scheduler(
    pipeline: Arc<IntelligencePipeline>,
    config: &PipelineConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for kind in JobKind::ALL {
        let cron = config.cron_for(kind);
        let pipeline = pipeline.clone();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                match pipeline.run_job(kind).await {
                    Ok(report) => info!(
                        dataset = kind.dataset(),
                        status = %report.status(),
                        "scheduled job finished"
                    ),
                    Err(err) => error!(dataset = kind.dataset(), "scheduled job failed: {err:#}"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agri_connector::{FixtureBundle, FixtureConnector};
    use agri_storage::MemoryStore;

    fn pipeline() -> Arc<IntelligencePipeline> {
        Arc::new(IntelligencePipeline::new(
            Arc::new(FixtureConnector::new(FixtureBundle::default())),
            Arc::new(MemoryStore::new()),
        ))
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let mut config = PipelineConfig::from_env();
        config.scheduler_enabled = false;
        assert!(build_scheduler(pipeline(), &config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_cron_is_reported() {
        let mut config = PipelineConfig::from_env();
        config.scheduler_enabled = true;
        config.cron_supply = "every tuesday".to_string();
        let Err(err) = build_scheduler(pipeline(), &config).await else {
            panic!("expected an invalid cron error");
        };
        assert!(err.to_string().contains("every tuesday"));
    }
}
