use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use armada_common::args::{AuditArgs, BackgroundArgs};

use crate::alerts;
use crate::lock::BackgroundLock;
use crate::server::AppState;

/// The background loops: alert evaluation, audit retention, pool sweeping.
/// Started only by the process holding the singleton lock; every loop hangs
/// off one cancellation token.
pub struct BackgroundRunner {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    _lock: BackgroundLock,
}

const ALERT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const POOL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn start(
    state: &AppState,
    background: &BackgroundArgs,
    audit: &AuditArgs,
    parent_cancel: &CancellationToken,
) -> Option<BackgroundRunner> {
    if !background.enable_background_tasks {
        println!(
            "{}",
            "⏭️ Background tasks disabled (ENABLE_BACKGROUND_TASKS=false)".yellow()
        );
        return None;
    }
    let Some(lock) = BackgroundLock::try_acquire(background.background_tasks_lockfile.as_deref())
    else {
        println!(
            "{}",
            "⏭️ Background tasks lock held by another process; serving API only".yellow()
        );
        return None;
    };

    let cancel = parent_cancel.child_token();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(pool_sweeper(state.clone(), cancel.clone())));
    tasks.push(tokio::spawn(audit_retention(
        state.clone(),
        audit.clone(),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(alert_checker(state.clone(), cancel.clone())));

    println!("{}", "🌱 Background loops started".green());
    Some(BackgroundRunner {
        cancel,
        tasks,
        _lock: lock,
    })
}

impl BackgroundRunner {
    /// Cancel every loop and wait for them with a bounded timeout; the
    /// singleton lock releases when the runner drops.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .is_err()
            {
                tracing::warn!("background task did not stop within the grace period");
            }
        }
        println!("{}", "🛑 Background loops stopped".red());
    }
}

async fn pool_sweeper(state: AppState, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(POOL_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => state.pool.sweep(),
        }
    }
}

async fn audit_retention(state: AppState, args: AuditArgs, cancel: CancellationToken) {
    let interval =
        Duration::from_secs(args.audit_log_cleanup_interval_hours.max(1) * 3600);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup isn't a purge.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                state
                    .audit
                    .purge_older_than(
                        args.audit_log_retention_days,
                        args.audit_log_cleanup_batch_size,
                    )
                    .await;
            }
        }
    }
}

async fn alert_checker(state: AppState, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ALERT_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                alerts::check_all_rules(&state.db, &state.pool, &state.cache).await;
            }
        }
    }
}
