//! Background execution: crontabs and daemons.
//!
//! A crontab borrows a pooled worker for each fire, exactly as a
//! request would, and returns it when the run settles; a slow run makes
//! the next fire wait for a free worker rather than overlapping. A
//! daemon instead takes a dedicated worker for as long as it lives,
//! shrinking the pool's effective capacity by one.
//!
//! Stopping either goes through interruption only. A daemon that exits,
//! on its own or after a stop, is deregistered and never restarted
//! automatically; restarting is an admin action.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use plinth_core::cron::CronSchedule;
use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;
use plinth_db::models::source::Source;
use plinth_db::repositories::SourceRepo;
use plinth_db::DbPool;

use crate::cache::ProcessCache;
use crate::dispatch;
use crate::pool::WorkerPool;

/// Interrupt reason delivered to a stopped daemon.
pub const DAEMON_STOP_REASON: &str = "Daemon stopped";

pub struct Scheduler {
    pool: WorkerPool,
    cache: Arc<ProcessCache>,
    db: DbPool,
    /// Deadline applied to each crontab fire.
    run_timeout: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        pool: WorkerPool,
        cache: Arc<ProcessCache>,
        db: DbPool,
        run_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            db,
            run_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop every crontab loop. Daemons are not touched; they stop via
    /// [`stop_daemon`] or process exit.
    ///
    /// [`stop_daemon`]: Scheduler::stop_daemon
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Schedule active crontabs that are not already scheduled: all of
    /// them, or just `only`. Rows with an unparsable expression are
    /// logged and skipped. Returns how many loops were started.
    pub async fn start_crontabs(&self, only: Option<&str>) -> Result<usize, CoreError> {
        let mut started = 0;
        for source in self.active_sources("crontab", only).await? {
            let name = source.name.clone();
            if self.cache.crontab_scheduled(&name) {
                continue;
            }
            let schedule = match CronSchedule::parse(&source.cron) {
                Ok(schedule) => schedule,
                Err(err) => {
                    tracing::error!(crontab = %name, error = %err, "stored cron expression does not parse, skipping");
                    continue;
                }
            };
            let token = self.shutdown.child_token();
            if !self.cache.register_crontab(&name, token.clone()) {
                continue;
            }
            tracing::info!(crontab = %name, cron = %source.cron, "crontab scheduled");
            tokio::spawn(cron_loop(
                self.pool.clone(),
                self.cache.clone(),
                name,
                schedule,
                token,
                self.run_timeout,
            ));
            started += 1;
        }
        Ok(started)
    }

    /// Cancel a crontab's loop. False when it was not scheduled.
    pub fn unschedule_crontab(&self, name: &str) -> bool {
        match self.cache.take_crontab(name) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Launch active daemons that are not already running: all of them,
    /// or just `only`. Returns how many launches were spawned.
    pub async fn start_daemons(&self, only: Option<&str>) -> Result<usize, CoreError> {
        let mut started = 0;
        for source in self.active_sources("daemon", only).await? {
            if self.spawn_daemon(source.name) {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Launch one daemon onto a dedicated worker. The spawned task waits
    /// for a free worker, so with every worker busy the daemon starts
    /// only once one frees up. False when the daemon is already running.
    pub fn spawn_daemon(&self, name: String) -> bool {
        if self.cache.daemon_running(&name) {
            return false;
        }
        let pool = self.pool.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let worker = pool.acquire().await;
            if !cache.register_daemon(&name, worker.interrupt_handle()) {
                tracing::debug!(daemon = %name, "daemon already registered, releasing worker");
                return;
            }
            tracing::info!(daemon = %name, worker = worker.slot(), "daemon started");
            let entry = format!("./daemon/{name}");
            let outcome = worker.run(&entry, ScriptValue::Null).await;
            cache.take_daemon(&name);
            match outcome.result {
                Ok(_) => tracing::info!(daemon = %name, "daemon exited"),
                Err(err) => tracing::error!(daemon = %name, error = %err, "daemon terminated"),
            }
        });
        true
    }

    /// Interrupt a running daemon. Its worker frees once the engine
    /// observes the interrupt. False when no daemon by that name runs.
    pub fn stop_daemon(&self, name: &str) -> bool {
        match self.cache.take_daemon(name) {
            Some(interrupt) => {
                tracing::info!(daemon = %name, "stopping daemon");
                interrupt.interrupt(DAEMON_STOP_REASON);
                true
            }
            None => false,
        }
    }

    pub fn daemon_running(&self, name: &str) -> bool {
        self.cache.daemon_running(name)
    }

    async fn active_sources(
        &self,
        kind: &'static str,
        only: Option<&str>,
    ) -> Result<Vec<Source>, CoreError> {
        let rows = match only {
            Some(name) => SourceRepo::find_active_by_name_and_kind(&self.db, name, kind)
                .await
                .map_err(db_err)?
                .into_iter()
                .collect(),
            None => SourceRepo::list_active_by_kind(&self.db, kind)
                .await
                .map_err(db_err)?,
        };
        Ok(rows)
    }
}

async fn cron_loop(
    pool: WorkerPool,
    cache: Arc<ProcessCache>,
    name: String,
    schedule: CronSchedule,
    token: CancellationToken,
    run_timeout: Duration,
) {
    let entry = format!("./crontab/{name}");
    loop {
        let now = chrono::Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::warn!(crontab = %name, "schedule has no future fire time, stopping");
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let worker = tokio::select! {
            _ = token.cancelled() => break,
            worker = pool.acquire() => worker,
        };
        tracing::debug!(crontab = %name, worker = worker.slot(), "crontab firing");
        let outcome = dispatch::execute(
            worker,
            &entry,
            ScriptValue::Null,
            run_timeout,
            CancellationToken::new(),
        )
        .await;
        if let Err(err) = outcome.result {
            tracing::error!(crontab = %name, error = %err, "crontab run failed");
        }
    }
    cache.take_crontab(&name);
    tracing::info!(crontab = %name, "crontab unscheduled");
}

fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::Database(err.to_string())
}
