//! Cron-driven `watch` mode: re-runs each configured domain on its schedule.

pub mod cron;
pub mod engine;

pub use self::cron::WatchPlan;
pub use self::engine::run_watch_loop;
