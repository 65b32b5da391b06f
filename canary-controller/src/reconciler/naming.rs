//! Deterministic worker names
//!
//! A worker name is a pure function of (job, run, stage, index), so a
//! repeated evaluation finds the worker an earlier one created instead of
//! creating a second one.

use canary_core::domain::meta::DNS_LABEL_MAX_LEN;
use chrono::{DateTime, Utc};

/// Run key of a one-shot schedule
pub const ONCE_RUN_KEY: &str = "once";

/// Run key of the cron firing at `firing`
pub fn run_key_for_firing(firing: DateTime<Utc>) -> String {
    format!("r{}", firing.timestamp())
}

/// Which hook list a hook worker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Pre,
    Post,
}

impl HookStage {
    pub fn tag(self) -> &'static str {
        match self {
            HookStage::Pre => "pre",
            HookStage::Post => "post",
        }
    }
}

pub fn hook_worker_name(parent: &str, run_key: &str, stage: HookStage, index: usize) -> String {
    worker_name(parent, &format!("{}-{}-{}", run_key, stage.tag(), index))
}

pub fn test_worker_name(parent: &str, run_key: &str) -> String {
    worker_name(parent, &format!("{}-test", run_key))
}

/// Joins `parent` and `suffix` into a DNS-1123 label
///
/// Only the parent part is shortened when the result would exceed 63
/// characters, so names of different runs and stages stay distinct.
fn worker_name(parent: &str, suffix: &str) -> String {
    let suffix = sanitize_dns_label(suffix);
    let budget = DNS_LABEL_MAX_LEN.saturating_sub(suffix.len() + 1);

    // Sanitized labels are ASCII, byte slicing is safe
    let parent = sanitize_dns_label(parent);
    let parent = parent[..parent.len().min(budget)].trim_end_matches('-');

    if parent.is_empty() {
        suffix
    } else {
        format!("{}-{}", parent, suffix)
    }
}

/// Forces `base` into a DNS-1123 label
///
/// Lowercases, replaces anything outside `[a-z0-9-]` with '-', truncates
/// to 63 characters and strips hyphens at both ends. Falls back to "job".
pub fn sanitize_dns_label(base: &str) -> String {
    let mapped: String = base
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .take(DNS_LABEL_MAX_LEN)
        .collect();

    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        "job".to_string()
    } else {
        trimmed.to_string()
    }
}
