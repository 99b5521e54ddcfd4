//! Statistics calculation for usage data

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike, Utc};

use crate::usage::models::{
    DailyUsage, ModelUsage, ProjectUsage, TodaySummary, TokenCounts, UsageEvent, UsageStats,
};

/// Filter options for usage data
#[derive(Debug, Default, Clone)]
pub struct EventFilter {
    /// Filter by start date (inclusive)
    pub start_date: Option<DateTime<Utc>>,
    /// Filter by end date (inclusive)
    pub end_date: Option<DateTime<Utc>>,
    /// Filter by project display name
    pub project: Option<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    /// Check if an event passes the filter
    pub fn matches(&self, event: &UsageEvent) -> bool {
        if let Some(start) = &self.start_date {
            if event.timestamp < *start {
                return false;
            }
        }
        if let Some(end) = &self.end_date {
            if event.timestamp > *end {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if event.project != *project {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, events: &'a [UsageEvent]) -> Vec<&'a UsageEvent> {
        events.iter().filter(|e| self.matches(e)).collect()
    }
}

/// Distinct non-null session ids
fn distinct_sessions<'a>(events: impl IntoIterator<Item = &'a UsageEvent>) -> usize {
    events
        .into_iter()
        .filter_map(|e| e.session_id.as_deref())
        .collect::<HashSet<_>>()
        .len()
}

/// Per-model totals, sorted by total tokens descending
pub fn by_model<'a>(events: impl IntoIterator<Item = &'a UsageEvent>) -> Vec<ModelUsage> {
    let mut model_map: HashMap<&str, (ModelUsage, HashSet<&str>)> = HashMap::new();
    let mut total_tokens: u64 = 0;

    for event in events {
        total_tokens = total_tokens.saturating_add(event.total_tokens());

        let (stats, sessions) = model_map.entry(event.model.as_str()).or_insert_with(|| {
            (
                ModelUsage {
                    model: event.model.clone(),
                    ..Default::default()
                },
                HashSet::new(),
            )
        });

        stats.tokens += event.tokens;
        stats.cost_usd += event.cost_usd;
        stats.event_count += 1;
        if let Some(session_id) = event.session_id.as_deref() {
            sessions.insert(session_id);
        }
    }

    let mut model_list: Vec<_> = model_map
        .into_values()
        .map(|(mut m, sessions)| {
            m.session_count = sessions.len().max(1) as u32;
            m.percentage = if total_tokens > 0 {
                (m.tokens.total() as f64 / total_tokens as f64) * 100.0
            } else {
                0.0
            };
            m
        })
        .collect();

    model_list.sort_by(|a, b| {
        b.tokens
            .total()
            .cmp(&a.tokens.total())
            .then_with(|| a.model.cmp(&b.model))
    });
    model_list
}

/// Per-day totals in the given time zone, sorted by date ascending
pub fn by_date_in<'a, Tz: TimeZone>(
    events: impl IntoIterator<Item = &'a UsageEvent>,
    tz: &Tz,
) -> Vec<DailyUsage> {
    let mut daily_map: HashMap<NaiveDate, (DailyUsage, BTreeSet<&str>)> = HashMap::new();

    for event in events {
        let local = event.timestamp.with_timezone(tz);
        let date = local.date_naive();
        let hour = local.hour() as usize;

        let (daily, models) = daily_map
            .entry(date)
            .or_insert_with(|| (DailyUsage::new(date), BTreeSet::new()));

        daily.tokens += event.tokens;
        daily.cost_usd += event.cost_usd;
        daily.hourly_costs[hour] += event.cost_usd;
        daily.event_count += 1;
        models.insert(event.model.as_str());
    }

    let mut daily_usage: Vec<_> = daily_map
        .into_values()
        .map(|(mut d, models)| {
            d.models = models.into_iter().map(String::from).collect();
            d
        })
        .collect();
    daily_usage.sort_by_key(|d| d.date);
    daily_usage
}

/// Per-project totals, most recently used first
pub fn by_project<'a>(events: impl IntoIterator<Item = &'a UsageEvent>) -> Vec<ProjectUsage> {
    let mut project_map: HashMap<&str, (ProjectUsage, HashSet<&str>)> = HashMap::new();

    for event in events {
        let (stats, sessions) = project_map.entry(event.project.as_str()).or_insert_with(|| {
            (
                ProjectUsage {
                    project: event.project.clone(),
                    tokens: TokenCounts::default(),
                    cost_usd: 0.0,
                    session_count: 0,
                    event_count: 0,
                    first_used: event.timestamp,
                    last_used: event.timestamp,
                },
                HashSet::new(),
            )
        });

        stats.tokens += event.tokens;
        stats.cost_usd += event.cost_usd;
        stats.event_count += 1;
        stats.first_used = stats.first_used.min(event.timestamp);
        stats.last_used = stats.last_used.max(event.timestamp);
        if let Some(session_id) = event.session_id.as_deref() {
            sessions.insert(session_id);
        }
    }

    let mut projects: Vec<_> = project_map
        .into_values()
        .map(|(mut p, sessions)| {
            p.session_count = sessions.len() as u32;
            p
        })
        .collect();

    projects.sort_by(|a, b| {
        b.last_used
            .cmp(&a.last_used)
            .then_with(|| a.project.cmp(&b.project))
    });
    projects
}

/// Aggregate events into totals and breakdowns, grouping days in `tz`
pub fn aggregate_in<Tz: TimeZone>(events: &[UsageEvent], tz: &Tz) -> UsageStats {
    if events.is_empty() {
        return UsageStats::default();
    }

    UsageStats {
        total_cost_usd: events.iter().map(|e| e.cost_usd).sum(),
        tokens: events.iter().map(|e| e.tokens).sum(),
        session_count: distinct_sessions(events).max(1) as u32,
        by_model: by_model(events),
        by_date: by_date_in(events, tz),
        by_project: by_project(events),
    }
}

/// Aggregate events, grouping days by the local calendar
pub fn aggregate(events: &[UsageEvent]) -> UsageStats {
    aggregate_in(events, &Local)
}

/// Usage on one calendar day of `tz`
pub fn day_summary_in<Tz: TimeZone>(events: &[UsageEvent], date: NaiveDate, tz: &Tz) -> TodaySummary {
    let mut summary = TodaySummary {
        date,
        cost_usd: 0.0,
        tokens: TokenCounts::default(),
        event_count: 0,
    };

    for event in events
        .iter()
        .filter(|e| e.timestamp.with_timezone(tz).date_naive() == date)
    {
        summary.cost_usd += event.cost_usd;
        summary.tokens += event.tokens;
        summary.event_count += 1;
    }

    summary
}

/// Today's usage since local midnight
pub fn today_summary(events: &[UsageEvent]) -> TodaySummary {
    day_summary_in(events, Local::now().date_naive(), &Local)
}

/// Events that fall on `date` in the local calendar
pub fn events_on(events: &[UsageEvent], date: NaiveDate) -> Vec<UsageEvent> {
    events
        .iter()
        .filter(|e| e.timestamp.with_timezone(&Local).date_naive() == date)
        .cloned()
        .collect()
}
