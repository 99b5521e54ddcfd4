//! Background refresh task for push-based updates

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::usage::error::Result;
use crate::usage::models::{BurnRate, TodaySummary, UsageSession};
use crate::usage::service::{SessionProvider, UsageProvider, UsageService};
use crate::usage::watcher::{ChangeNotifier, WatchHandle};

/// What woke the refresh loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshTrigger {
    Interval,
    FileChange,
}

/// Latest live numbers published to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub today: TodaySummary,
    pub active_session: Option<UsageSession>,
    pub burn_rate: BurnRate,
    pub token_limit: u64,
    pub trigger: RefreshTrigger,
    /// Whether today's totals or the active session differ from the previous snapshot
    pub has_changes: bool,
    pub refreshed_at: DateTime<Utc>,
}

/// Compute a fresh snapshot from a provider
pub fn take_snapshot<P>(
    provider: &P,
    trigger: RefreshTrigger,
    previous: Option<&UsageSnapshot>,
) -> Result<UsageSnapshot>
where
    P: UsageProvider + SessionProvider + ?Sized,
{
    provider.invalidate_cache()?;
    let today = provider.today_summary()?;
    let active_session = provider.active_session()?;
    let burn_rate = active_session
        .as_ref()
        .map(|s| s.burn_rate)
        .unwrap_or_default();
    let token_limit = provider.token_limit()?;

    let has_changes = match previous {
        None => true,
        Some(prev) => prev.today != today || prev.active_session != active_session,
    };

    Ok(UsageSnapshot {
        today,
        active_session,
        burn_rate,
        token_limit,
        trigger,
        has_changes,
        refreshed_at: Utc::now(),
    })
}

/// Start the background refresh task
///
/// Refreshes on every `refresh_interval` tick (the first one immediately) and
/// whenever `changes` yields. Each refresh invalidates the provider's caches
/// and publishes a snapshot on the returned channel. The task ends once every
/// receiver is dropped.
pub fn start_background_refresh<P>(
    provider: Arc<P>,
    refresh_interval: Duration,
    mut changes: mpsc::UnboundedReceiver<()>,
) -> (JoinHandle<()>, watch::Receiver<Option<UsageSnapshot>>)
where
    P: UsageProvider + SessionProvider + 'static,
{
    let (tx, rx) = watch::channel(None);

    let handle = tokio::spawn(async move {
        let mut ticker = interval(refresh_interval);
        let mut changes_open = true;

        loop {
            let trigger = tokio::select! {
                _ = ticker.tick() => RefreshTrigger::Interval,
                change = changes.recv(), if changes_open => match change {
                    Some(()) => RefreshTrigger::FileChange,
                    None => {
                        log::debug!("Change notifications closed, continuing on interval only");
                        changes_open = false;
                        continue;
                    }
                },
            };

            if tx.is_closed() {
                break;
            }

            let previous = tx.borrow().clone();
            let worker = Arc::clone(&provider);
            let result = tokio::task::spawn_blocking(move || {
                take_snapshot(worker.as_ref(), trigger, previous.as_ref())
            })
            .await;

            match result {
                Ok(Ok(snapshot)) => {
                    log::debug!(
                        "Publishing usage snapshot ({:?}, has_changes={})",
                        trigger,
                        snapshot.has_changes
                    );
                    if tx.send(Some(snapshot)).is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => log::warn!("Background refresh failed: {}", e),
                Err(e) => log::error!("Background refresh task panicked: {}", e),
            }
        }
    });

    (handle, rx)
}

/// A running refresh loop wired to a change notifier
#[derive(Debug)]
pub struct BackgroundRefresh {
    pub handle: JoinHandle<()>,
    pub snapshots: watch::Receiver<Option<UsageSnapshot>>,
    /// Absent when the data directory could not be watched
    pub watch: Option<WatchHandle>,
}

impl BackgroundRefresh {
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Watch the service's projects directory and refresh on changes and on the
/// configured fallback interval
///
/// A directory that cannot be watched (typically because it does not exist
/// yet) leaves only the interval refresh running.
pub fn spawn_for_service(service: Arc<UsageService>, notifier: &dyn ChangeNotifier) -> BackgroundRefresh {
    let config = service.config().clone();
    let (change_tx, change_rx) = mpsc::unbounded_channel();

    let projects_dir = service.projects_dir();
    let watch = match notifier.watch(
        &projects_dir,
        config.debounce(),
        Box::new(move || {
            let _ = change_tx.send(());
        }),
    ) {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("Not watching {:?}: {}", projects_dir, e);
            None
        }
    };

    let (handle, snapshots) = start_background_refresh(service, config.refresh_interval(), change_rx);

    BackgroundRefresh {
        handle,
        snapshots,
        watch,
    }
}
