//! Gap-based session windowing and burn rate

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::usage::config::EngineConfig;
use crate::usage::models::{BurnRate, TokenCounts, UsageEvent, UsageSession};

/// Default session duration (5 hours)
pub const DEFAULT_SESSION_HOURS: i64 = 5;

/// Minimum span before a burn rate is extrapolated
pub const DEFAULT_MIN_BURN_RATE_SECONDS: i64 = 60;

/// Windowing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub session_duration: Duration,
    pub min_burn_rate_span: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration: Duration::hours(DEFAULT_SESSION_HOURS),
            min_burn_rate_span: Duration::seconds(DEFAULT_MIN_BURN_RATE_SECONDS),
        }
    }
}

impl From<&EngineConfig> for SessionConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            session_duration: config.session_duration(),
            ..Self::default()
        }
    }
}

/// Burn rate over a run of events
///
/// Zero when there are fewer than two events or the run spans no more than
/// `min_span`.
pub fn calculate_burn_rate(events: &[UsageEvent], min_span: Duration) -> BurnRate {
    let (first, last) = match (events.first(), events.last()) {
        (Some(first), Some(last)) if events.len() >= 2 => (first, last),
        _ => return BurnRate::default(),
    };

    let span = last.timestamp - first.timestamp;
    if span <= min_span {
        return BurnRate::default();
    }

    let span_minutes = span.num_milliseconds() as f64 / 60_000.0;
    let total_tokens = events
        .iter()
        .map(UsageEvent::total_tokens)
        .fold(0u64, u64::saturating_add);
    let total_cost: f64 = events.iter().map(|e| e.cost_usd).sum();

    BurnRate {
        tokens_per_minute: total_tokens as f64 / span_minutes,
        cost_per_hour: total_cost / (span_minutes / 60.0),
    }
}

/// Display start for an active session: the most recent rolling boundary
/// anchored at the first event
pub fn rolling_window_start(
    first_event: DateTime<Utc>,
    now: DateTime<Utc>,
    session_duration: Duration,
) -> DateTime<Utc> {
    let duration_ms = session_duration.num_milliseconds();
    if duration_ms <= 0 {
        return now;
    }
    let elapsed_ms = (now - first_event).num_milliseconds();
    now - Duration::milliseconds(elapsed_ms.rem_euclid(duration_ms))
}

/// Split sorted events wherever consecutive events are more than
/// `session_duration` apart
fn split_on_gaps(events: &[UsageEvent], session_duration: Duration) -> Vec<&[UsageEvent]> {
    let mut runs = Vec::new();
    let mut run_start = 0;

    for i in 1..events.len() {
        if events[i].timestamp - events[i - 1].timestamp > session_duration {
            runs.push(&events[run_start..i]);
            run_start = i;
        }
    }
    if run_start < events.len() {
        runs.push(&events[run_start..]);
    }

    runs
}

fn build_session(
    run: &[UsageEvent],
    start_time: DateTime<Utc>,
    is_active: bool,
    config: &SessionConfig,
) -> UsageSession {
    let tokens: TokenCounts = run.iter().map(|e| e.tokens).sum();
    let cost_usd = run.iter().map(|e| e.cost_usd).sum();
    let models: BTreeSet<&str> = run.iter().map(|e| e.model.as_str()).collect();
    let actual_end_time = run.last().map(|e| e.timestamp).unwrap_or(start_time);

    UsageSession {
        start_time,
        end_time: start_time + config.session_duration,
        actual_end_time,
        is_active,
        events: run.to_vec(),
        tokens,
        cost_usd,
        models: models.into_iter().map(String::from).collect(),
        burn_rate: calculate_burn_rate(run, config.min_burn_rate_span),
        token_limit: None,
    }
}

/// Group time-ordered events into sessions
///
/// `events` must be sorted by timestamp. Every session but the last is
/// historical and starts at its first event. The last one is active while
/// its newest event is younger than the session duration; an active
/// session's start follows the rolling window and it carries the inferred
/// token limit.
pub fn window_sessions(
    events: &[UsageEvent],
    now: DateTime<Utc>,
    config: &SessionConfig,
) -> Vec<UsageSession> {
    let runs = split_on_gaps(events, config.session_duration);
    let last_index = runs.len().saturating_sub(1);

    let mut sessions: Vec<UsageSession> = runs
        .into_iter()
        .enumerate()
        .map(|(i, run)| {
            let first = run[0].timestamp;
            let last = run[run.len() - 1].timestamp;
            let is_active = i == last_index && now - last < config.session_duration;
            let start_time = if is_active {
                rolling_window_start(first, now, config.session_duration)
            } else {
                first
            };
            build_session(run, start_time, is_active, config)
        })
        .collect();

    let limit = inferred_token_limit(&sessions);
    if let Some(active) = sessions.last_mut().filter(|s| s.is_active) {
        active.token_limit = Some(limit);
    }

    sessions
}

/// Largest total token count among historical sessions, 0 when there are none
pub fn inferred_token_limit(sessions: &[UsageSession]) -> u64 {
    sessions
        .iter()
        .filter(|s| !s.is_active)
        .map(UsageSession::total_tokens)
        .max()
        .unwrap_or(0)
}

/// The active session, if the latest one is still open
pub fn active_session(sessions: &[UsageSession]) -> Option<&UsageSession> {
    sessions.last().filter(|s| s.is_active)
}
