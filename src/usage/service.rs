//! Usage service: the entry point for the presentation layer

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, Utc};
use serde::Serialize;

use crate::usage::cache::{SessionCache, StatsCache, UsageStore};
use crate::usage::catalog::FileFilter;
use crate::usage::config::{get_projects_dir, EngineConfig};
use crate::usage::error::Result;
use crate::usage::models::{BurnRate, TodaySummary, UsageEvent, UsageSession, UsageStats};
use crate::usage::pricing::PricingCalculator;
use crate::usage::session::{active_session, inferred_token_limit, window_sessions, SessionConfig};
use crate::usage::stats::{aggregate, day_summary_in, events_on};

/// Source of usage events and aggregated statistics
pub trait UsageProvider: Send + Sync {
    /// Events that fall on today's local date
    fn today_events(&self) -> Result<Vec<UsageEvent>>;

    /// Every known event, sorted by timestamp
    fn all_events(&self) -> Result<Arc<Vec<UsageEvent>>>;

    /// Aggregated statistics over all events
    fn usage_stats(&self) -> Result<Arc<UsageStats>>;

    /// Today's cost and token totals
    fn today_summary(&self) -> Result<TodaySummary> {
        let events = self.today_events()?;
        Ok(day_summary_in(&events, Local::now().date_naive(), &Local))
    }

    /// Forget memoized results so the next query recomputes
    fn invalidate_cache(&self) -> Result<()>;
}

/// Source of usage sessions
pub trait SessionProvider: Send + Sync {
    /// All sessions in the recent window, oldest first
    fn sessions(&self) -> Result<Arc<Vec<UsageSession>>>;

    /// The session still open, if any
    fn active_session(&self) -> Result<Option<UsageSession>> {
        Ok(active_session(&self.sessions()?).cloned())
    }

    /// Burn rate of the active session
    ///
    /// Zero when there is no active session, and also when the active session
    /// is too short to extrapolate (fewer than two events or under a minute).
    fn current_burn_rate(&self) -> Result<BurnRate> {
        Ok(self
            .active_session()?
            .map(|s| s.burn_rate)
            .unwrap_or_default())
    }

    /// Token ceiling inferred from the largest historical session
    fn token_limit(&self) -> Result<u64> {
        let sessions = self.sessions()?;
        Ok(active_session(&sessions)
            .and_then(|s| s.token_limit)
            .unwrap_or_else(|| inferred_token_limit(&sessions)))
    }
}

/// Today's events together with the active session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayUsage {
    pub summary: TodaySummary,
    pub events: Vec<UsageEvent>,
    pub active_session: Option<UsageSession>,
}

/// Production provider backed by the log files under one data root
///
/// Three incremental stores cover disjoint needs: files touched today, files
/// touched within two session lengths (for windowing) and every file (for
/// history). Each is refreshed only when queried.
#[derive(Debug)]
pub struct UsageService {
    config: EngineConfig,
    session_config: SessionConfig,
    today_store: UsageStore,
    session_store: UsageStore,
    history_store: UsageStore,
    session_cache: SessionCache,
    stats_cache: StatsCache,
}

impl UsageService {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_pricing(config, PricingCalculator::new())
    }

    pub fn with_pricing(config: EngineConfig, pricing: PricingCalculator) -> Self {
        let root = config.data_dir();
        let session_config = SessionConfig::from(&config);
        let recent_hours = config.session_hours() * 2.0;
        let ttl = config.cache_ttl();

        Self {
            today_store: UsageStore::new(&root, FileFilter::modified_today(), pricing.clone()),
            session_store: UsageStore::new(
                &root,
                FileFilter::modified_within(recent_hours),
                pricing.clone(),
            ),
            history_store: UsageStore::new(&root, FileFilter::all(), pricing),
            session_cache: SessionCache::new(ttl),
            stats_cache: StatsCache::new(ttl),
            session_config,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Directory holding per-project logs, the one to watch for changes
    pub fn projects_dir(&self) -> PathBuf {
        get_projects_dir(&self.config.data_dir())
    }

    /// Forget memoized sessions and stats; stores stay warm
    pub fn invalidate_cache(&self) -> Result<()> {
        self.session_cache.invalidate()?;
        self.stats_cache.invalidate()
    }

    /// Drop everything, forcing a full re-parse on next access
    pub fn clear_cache(&self) -> Result<()> {
        self.invalidate_cache()?;
        self.today_store.clear_cache()?;
        self.session_store.clear_cache()?;
        self.history_store.clear_cache()
    }

    fn compute_sessions(&self) -> Result<Arc<Vec<UsageSession>>> {
        let events = self.session_store.events()?;
        Ok(Arc::new(window_sessions(&events, Utc::now(), &self.session_config)))
    }

    fn compute_stats(&self) -> Result<Arc<UsageStats>> {
        let events = self.history_store.events()?;
        Ok(Arc::new(aggregate(&events)))
    }

    /// Load today's events and the active session concurrently
    pub async fn load_today(self: Arc<Self>) -> Result<TodayUsage> {
        let today = Local::now().date_naive();
        let events_service = Arc::clone(&self);
        let session_service = Arc::clone(&self);

        let (events, active) = tokio::try_join!(
            tokio::task::spawn_blocking(move || events_service.today_events()),
            tokio::task::spawn_blocking(move || session_service.active_session()),
        )?;
        let events = events?;

        Ok(TodayUsage {
            summary: day_summary_in(&events, today, &Local),
            events,
            active_session: active?,
        })
    }
}

impl UsageProvider for UsageService {
    fn today_events(&self) -> Result<Vec<UsageEvent>> {
        let events = self.today_store.events()?;
        Ok(events_on(&events, Local::now().date_naive()))
    }

    fn all_events(&self) -> Result<Arc<Vec<UsageEvent>>> {
        self.history_store.events()
    }

    fn usage_stats(&self) -> Result<Arc<UsageStats>> {
        self.stats_cache.get_or_compute(|| self.compute_stats())
    }

    fn invalidate_cache(&self) -> Result<()> {
        UsageService::invalidate_cache(self)
    }
}

impl SessionProvider for UsageService {
    fn sessions(&self) -> Result<Arc<Vec<UsageSession>>> {
        self.session_cache.get_or_compute(|| self.compute_sessions())
    }
}
