//! Watch loop: ticks once per second and spawns one run per due domain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::{Credentials, VigilConfig};
use crate::detect::RunStatus;
use crate::domains::DomainKind;
use crate::scheduler::WatchPlan;
use crate::RunOptions;

/// Main watch loop. Polls the plan every second and spawns one independent
/// task per due domain until ctrl-c.
pub async fn run_watch_loop(
    config: Arc<VigilConfig>,
    mut plan: WatchPlan,
    credentials: HashMap<DomainKind, Credentials>,
    dry_run: bool,
) -> anyhow::Result<()> {
    for (domain, at) in plan.upcoming(Utc::now()) {
        info!(%domain, next = %at, "scheduled");
    }

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("watch loop stopping");
                return Ok(());
            }
        }

        for domain in plan.due(Utc::now()) {
            let Some(creds) = credentials.get(&domain).cloned() else {
                warn!(%domain, "no credentials resolved for scheduled domain, skipping");
                continue;
            };
            let config = Arc::clone(&config);
            info!(%domain, "run due");

            tokio::spawn(async move {
                let opts = RunOptions {
                    dry_run,
                    credentials: creds,
                };
                match crate::run_once(domain, &config, &opts).await {
                    Ok(result) if result.status == RunStatus::Critical => {
                        warn!(%domain, status = %result.status, actions = result.actions.len(), "scheduled run critical")
                    }
                    Ok(result) => info!(%domain, status = %result.status, "scheduled run complete"),
                    Err(e) => error!(%domain, error = %e, "scheduled run failed to start"),
                }
            });
        }
    }
}
