//! vigil -- autonomous anomaly detection and remediation agents.
//!
//! Three domains (cloud cost, service health, data integrity) share one
//! pipeline: concurrent metric collection, statistics, severity
//! classification, pattern detection, and de-duplicated remediation actions.

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod domains;
pub mod scheduler;
pub mod sources;
pub mod storage;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::{Credentials, VigilConfig};
use crate::detect::engine::{run_pipeline, RunContext};
use crate::detect::{Metric, RunResult};
use crate::dispatch::{ActionDispatcher, CooldownDispatcher, LogDispatcher, WebhookDispatcher};
use crate::domains::DomainKind;
use crate::storage::{Pool, ResultStore, SqliteStore, UnavailableStore};

/// Per-invocation switches for [`run_once`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Log actions instead of dispatching them.
    pub dry_run: bool,
    pub credentials: Credentials,
}

/// Run one domain end to end against the configured database, sources and
/// dispatch endpoints.
///
/// An unopenable database degrades the run rather than failing it: the store
/// and the database-backed sources report errors, and actions are dispatched
/// without the cooldown ledger.
pub async fn run_once(domain: DomainKind, config: &VigilConfig, opts: &RunOptions) -> Result<RunResult> {
    info!(%domain, db = %config.database.path, dry_run = opts.dry_run, "starting run");
    let now = Utc::now();

    let (pool, store): (Option<Pool>, Box<dyn ResultStore>) = match storage::open_pool(&config.database.path) {
        Ok(pool) => {
            let store: Box<dyn ResultStore> = Box::new(SqliteStore::new(pool.clone()));
            (Some(pool), store)
        }
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(%domain, db = %config.database.path, error = %reason, "result store unavailable, running degraded");
            let store: Box<dyn ResultStore> = Box::new(UnavailableStore::new(reason));
            (None, store)
        }
    };
    let sources = domains::build_sources(domain, config, &opts.credentials, pool.as_ref())?;
    let analyzer = domains::analyzer(domain, config);

    let dispatcher: Box<dyn ActionDispatcher> = if opts.dry_run {
        Box::new(LogDispatcher)
    } else {
        let token = opts.credentials.dispatch_token.as_deref().unwrap_or_default();
        let webhook = WebhookDispatcher::new(&config.dispatch, token)?;
        match pool {
            Some(pool) => {
                let cooldown = CooldownDispatcher::new(webhook, pool, config.dispatch.cooldown_hours, now);
                match cooldown.prune_expired().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "pruned expired action fingerprints"),
                    Err(e) => warn!(error = %e, "failed to prune action ledger"),
                }
                Box::new(cooldown)
            }
            None => {
                warn!(%domain, "action ledger unavailable, dispatching without cooldown");
                Box::new(webhook)
            }
        }
    };

    let ctx = RunContext {
        now,
        source_timeout: Duration::from_secs(config.sources.timeout_secs),
        min_dispatch_priority: config.dispatch.min_priority,
    };
    Ok(run_pipeline(analyzer.as_ref(), &sources, store.as_ref(), dispatcher.as_ref(), &ctx).await)
}

/// Metrics persisted for `domain` over the last `hours`, oldest first.
pub async fn history(domain: DomainKind, config: &VigilConfig, hours: u32) -> Result<Vec<Metric>> {
    let pool = storage::open_pool(&config.database.path)?;
    let since = Utc::now() - chrono::Duration::hours(i64::from(hours));
    SqliteStore::new(pool).recent_metrics(domain, since).await
}
