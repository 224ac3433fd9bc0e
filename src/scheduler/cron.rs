//! Cron-driven watch plan: which domain is due at which slot.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::config::{ConfigError, ScheduleConfig};
use crate::domains::DomainKind;

struct Entry {
    domain: DomainKind,
    schedule: CronSchedule,
    /// Fire times at or before this instant have been handled.
    cursor: DateTime<Utc>,
}

/// Which domains `vigil watch` runs, and when.
pub struct WatchPlan {
    entries: Vec<Entry>,
}

impl WatchPlan {
    /// Parse every configured expression. Domains without one are left out.
    pub fn from_config(config: &ScheduleConfig, started: DateTime<Utc>) -> Result<Self, ConfigError> {
        let mut entries = Vec::new();
        for domain in DomainKind::ALL {
            let Some(expr) = config.expression(domain) else { continue };
            let schedule = CronSchedule::from_str(expr).map_err(|e| ConfigError::InvalidCron {
                domain,
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
            entries.push(Entry {
                domain,
                schedule,
                cursor: started,
            });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn domains(&self) -> Vec<DomainKind> {
        self.entries.iter().map(|e| e.domain).collect()
    }

    /// Domains with a fire time in `(cursor, now]`. Fire times missed while
    /// a tick was late collapse into a single run.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<DomainKind> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            let fires = entry.schedule.after(&entry.cursor).next().is_some_and(|next| next <= now);
            if fires {
                entry.cursor = now;
                due.push(entry.domain);
            }
        }
        due
    }

    /// Next fire time per domain after `now`, soonest first.
    pub fn upcoming(&self, now: DateTime<Utc>) -> Vec<(DomainKind, DateTime<Utc>)> {
        let mut next: Vec<_> = self
            .entries
            .iter()
            .filter_map(|e| e.schedule.after(&now).next().map(|t| (e.domain, t)))
            .collect();
        next.sort_by_key(|(_, t)| *t);
        next
    }
}
