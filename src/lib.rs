//! Claude Code Usage Engine
//!
//! Discovers Claude Code JSONL session logs, parses and prices assistant
//! usage, groups it into rolling session windows and aggregates per model,
//! day and project. [`usage::UsageService`] is the entry point.

pub mod usage;
