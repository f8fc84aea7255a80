//! Background auto-sync. A single tokio task re-reads the schedule
//! settings each cycle, waits out the next cron occurrence in short
//! naps (picking up schedule edits between them) and runs the
//! on-demand sync path. A shared guard makes the "already running"
//! case explicit: a cycle that finds the lock held is skipped, never
//! stacked.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::db::services as db_services;
use crate::db::services::settings_service::{KEY_AUTO_SYNC_ENABLED, KEY_AUTO_SYNC_SCHEDULE};
use crate::script_store::ScriptStore;
use crate::sync::catalog;

/// Shared between the scheduler and the manual trigger route; whoever
/// holds it is the one running sync.
pub type SyncGuard = Arc<Mutex<()>>;

/// Daily at 03:00 (cron with a seconds field).
pub const DEFAULT_SCHEDULE: &str = "0 0 3 * * *";

const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Next occurrence of a cron expression, or None when it is invalid.
pub fn next_occurrence(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = Schedule::from_str(expr).ok()?;
    schedule.after(&after).next()
}

/// One scheduler nap: the time left until the occurrence, capped at
/// the settings poll interval.
fn nap_slice(remaining: Duration) -> Duration {
    remaining.min(SETTINGS_POLL_INTERVAL)
}

pub fn spawn_auto_sync(
    db: DatabaseConnection,
    config: Arc<ServerConfig>,
    store: ScriptStore,
    guard: SyncGuard,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Auto-sync scheduler started.");
        loop {
            let enabled =
                match db_services::get_bool_setting(&db, KEY_AUTO_SYNC_ENABLED, false).await {
                    Ok(enabled) => enabled,
                    Err(e) => {
                        error!(error = %e, "Failed to read auto-sync settings.");
                        sleep(SETTINGS_POLL_INTERVAL).await;
                        continue;
                    }
                };
            if !enabled {
                sleep(SETTINGS_POLL_INTERVAL).await;
                continue;
            }

            let expr = match db_services::get_string_setting(&db, KEY_AUTO_SYNC_SCHEDULE).await {
                Ok(expr) => expr.unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
                Err(e) => {
                    error!(error = %e, "Failed to read auto-sync schedule.");
                    sleep(SETTINGS_POLL_INTERVAL).await;
                    continue;
                }
            };

            let Some(next) = next_occurrence(&expr, Utc::now()) else {
                warn!(schedule = %expr, "Invalid cron expression; auto-sync idle until it changes.");
                sleep(SETTINGS_POLL_INTERVAL).await;
                continue;
            };

            info!(next = %next, "Next auto-sync scheduled.");

            // Nap in short slices and re-read the expression between
            // them, so an edited schedule does not have to wait out
            // the old occurrence first.
            let mut rescheduled = false;
            while Utc::now() < next {
                let remaining = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                sleep(nap_slice(remaining)).await;
                match db_services::get_string_setting(&db, KEY_AUTO_SYNC_SCHEDULE).await {
                    Ok(current) => {
                        let current = current.unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());
                        if current != expr {
                            info!(schedule = %current, "Auto-sync schedule changed; recomputing.");
                            rescheduled = true;
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to re-read auto-sync schedule."),
                }
            }
            if rescheduled {
                continue;
            }

            // The toggle may have flipped while we slept.
            match db_services::get_bool_setting(&db, KEY_AUTO_SYNC_ENABLED, false).await {
                Ok(true) => {}
                _ => continue,
            }

            match guard.try_lock() {
                Ok(_held) => {
                    match catalog::run_catalog_sync(&db, &config, &store).await {
                        Ok(report) => {
                            info!(scripts = report.scripts, "Scheduled catalog sync succeeded.");
                        }
                        Err(e) => {
                            error!(error = %e, "Scheduled catalog sync failed.");
                        }
                    }
                }
                Err(_) => {
                    warn!("Previous sync still running; skipping this cycle.");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn valid_expression_yields_future_occurrence() {
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let next = next_occurrence(DEFAULT_SCHEDULE, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap());
    }

    #[test]
    fn invalid_expression_yields_none() {
        assert!(next_occurrence("definitely not cron", Utc::now()).is_none());
        assert!(next_occurrence("", Utc::now()).is_none());
    }

    #[test]
    fn long_waits_are_sliced_to_the_poll_interval() {
        assert_eq!(
            nap_slice(Duration::from_secs(60 * 60 * 20)),
            SETTINGS_POLL_INTERVAL
        );
        assert_eq!(nap_slice(Duration::from_secs(5)), Duration::from_secs(5));
        assert_eq!(nap_slice(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn hourly_expression_advances_by_the_hour() {
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 7, 30, 0).unwrap();
        let next = next_occurrence("0 0 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
    }
}
