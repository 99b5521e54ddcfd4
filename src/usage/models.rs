//! Data models for Claude Code usage monitoring

use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Message type carried by assistant completions
pub const ASSISTANT_MESSAGE_TYPE: &str = "assistant";

/// Model name used when a record carries no model
pub const PLACEHOLDER_MODEL: &str = "<synthetic>";

/// One line of a Claude Code JSONL log, as far as usage is concerned
#[derive(Debug, Clone, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub message: Option<Message>,
    pub timestamp: Option<String>,
    #[serde(alias = "costUSD", alias = "cost_usd")]
    pub cost: Option<f64>,
    #[serde(alias = "requestId")]
    pub request_id: Option<String>,
    #[serde(alias = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Usage {
    #[serde(default, alias = "inputTokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "outputTokens")]
    pub output_tokens: u64,
    #[serde(default, alias = "cacheCreationInputTokens")]
    pub cache_creation_input_tokens: u64,
    #[serde(default, alias = "cacheReadInputTokens")]
    pub cache_read_input_tokens: u64,
}

impl From<&Usage> for TokenCounts {
    fn from(usage: &Usage) -> Self {
        TokenCounts {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
        }
    }
}

/// Token usage split by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: cache_creation,
            cache_read_tokens: cache_read,
        }
    }

    /// Sum of all four token kinds, saturating at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    /// Sum of all four token kinds, `None` if it does not fit in a `u64`
    pub fn checked_total(&self) -> Option<u64> {
        self.input_tokens
            .checked_add(self.output_tokens)?
            .checked_add(self.cache_creation_tokens)?
            .checked_add(self.cache_read_tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenCounts {
    type Output = TokenCounts;

    fn add(self, rhs: TokenCounts) -> TokenCounts {
        TokenCounts {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
            cache_creation_tokens: self.cache_creation_tokens.saturating_add(rhs.cache_creation_tokens),
            cache_read_tokens: self.cache_read_tokens.saturating_add(rhs.cache_read_tokens),
        }
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: TokenCounts) {
        *self = *self + rhs;
    }
}

impl Sum for TokenCounts {
    fn sum<I: Iterator<Item = TokenCounts>>(iter: I) -> Self {
        iter.fold(TokenCounts::default(), Add::add)
    }
}

impl<'a> Sum<&'a TokenCounts> for TokenCounts {
    fn sum<I: Iterator<Item = &'a TokenCounts>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// A single accepted usage record. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub source_path: PathBuf,
    pub project: String,
    pub session_id: Option<String>,
    pub message_id: Option<String>,
    pub request_id: Option<String>,
    /// `messageId:requestId`, or a timestamp-plus-random id when either is missing
    pub entry_id: String,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// A discovered log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub project_dir: PathBuf,
    pub project_name: String,
    pub modified: SystemTime,
}

/// Burn rate metrics for a session
///
/// Both fields are zero when the session has fewer than two events or spans
/// less than the minimum burn-rate window. A zero rate therefore does not
/// necessarily mean "no activity", only "not enough data to extrapolate".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
}

impl BurnRate {
    pub fn is_zero(&self) -> bool {
        self.tokens_per_minute == 0.0 && self.cost_per_hour == 0.0
    }
}

/// A usage window derived from a gap-separated run of events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSession {
    /// Display start: exact first event, or the rolling boundary when active
    pub start_time: DateTime<Utc>,
    /// Nominal end, `start_time` plus the session duration
    pub end_time: DateTime<Utc>,
    /// Timestamp of the last event in the session
    pub actual_end_time: DateTime<Utc>,
    pub is_active: bool,
    pub events: Vec<UsageEvent>,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub models: Vec<String>,
    pub burn_rate: BurnRate,
    /// Inferred ceiling, only set on the active session
    pub token_limit: Option<u64>,
}

impl UsageSession {
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }

    /// Time left until the nominal end, never negative
    pub fn time_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.end_time - now).max(chrono::Duration::zero())
    }

    /// Fraction of the inferred token limit used so far
    pub fn limit_usage(&self) -> Option<f64> {
        match self.token_limit {
            Some(limit) if limit > 0 => Some(self.total_tokens() as f64 / limit as f64),
            _ => None,
        }
    }
}

/// Statistics for a specific model
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub model: String,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub session_count: u32,
    pub event_count: u32,
    pub percentage: f64,
}

/// Daily usage statistics, keyed by local calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub models: Vec<String>,
    pub hourly_costs: [f64; 24],
    pub event_count: u32,
}

impl DailyUsage {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            tokens: TokenCounts::default(),
            cost_usd: 0.0,
            models: Vec::new(),
            hourly_costs: [0.0; 24],
            event_count: 0,
        }
    }
}

/// Statistics for a single project
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUsage {
    pub project: String,
    pub tokens: TokenCounts,
    pub cost_usd: f64,
    pub session_count: u32,
    pub event_count: u32,
    pub first_used: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Aggregated statistics over a set of events
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub total_cost_usd: f64,
    pub tokens: TokenCounts,
    pub session_count: u32,
    pub by_model: Vec<ModelUsage>,
    pub by_date: Vec<DailyUsage>,
    pub by_project: Vec<ProjectUsage>,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }
}

/// Today's usage (since local midnight)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySummary {
    pub date: NaiveDate,
    pub cost_usd: f64,
    pub tokens: TokenCounts,
    pub event_count: u32,
}
