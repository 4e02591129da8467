//! Human-readable and JSON rebuild reports

use pk_cad::{Aabb, RebuildEvent, RebuildOutcome};
use pk_core::{CacheSummary, FeatureHash, Origin};
use serde::Serialize;

/// Leading hex digits shown for a hash
const SHORT_HASH: usize = 12;

fn short_hash(hash: &FeatureHash) -> String {
    let mut text = hash.to_string();
    text.truncate(SHORT_HASH);
    text
}

fn format_bounds(bounds: &Aabb) -> String {
    let point = |v: [f64; 3]| format!("({:.3}, {:.3}, {:.3})", v[0], v[1], v[2]);
    format!(
        "{}..{}",
        point(bounds.min.to_array()),
        point(bounds.max.to_array())
    )
}

fn origin_label(origin: Origin) -> &'static str {
    match origin {
        Origin::Built => "built",
        Origin::Cached => "cached",
    }
}

/// One line per processed symbol
pub fn format_event(event: &RebuildEvent) -> String {
    match event {
        RebuildEvent::SymbolBuilt {
            index,
            name,
            hash,
            origin,
            bounds,
        } => format!(
            "[{index:>3}] {name:<16} {:<6} {} {}",
            origin_label(*origin),
            short_hash(hash),
            format_bounds(bounds)
        ),
        RebuildEvent::SymbolFailed { index, name, error } => {
            format!("[{index:>3}] {name:<16} failed {error}")
        }
    }
}

pub fn format_outcome(outcome: &RebuildOutcome) -> String {
    match outcome {
        RebuildOutcome::Completed { built, failed } => {
            format!("Rebuild finished: {built} built, {failed} failed")
        }
        RebuildOutcome::Stopped { built, failed } => {
            format!("Rebuild stopped at first failure: {built} built, {failed} failed")
        }
        RebuildOutcome::Cancelled { completed } => {
            format!("Rebuild cancelled after {completed} symbols")
        }
        RebuildOutcome::Aborted(err) => format!("Rebuild aborted: {err}"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolReport {
    pub index: usize,
    pub name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<FeatureHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Aabb>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&RebuildEvent> for SymbolReport {
    fn from(event: &RebuildEvent) -> Self {
        match event {
            RebuildEvent::SymbolBuilt {
                index,
                name,
                hash,
                origin,
                bounds,
            } => Self {
                index: *index,
                name: name.clone(),
                status: origin_label(*origin),
                hash: Some(*hash),
                bounds: Some(*bounds),
                error: None,
            },
            RebuildEvent::SymbolFailed { index, name, error } => Self {
                index: *index,
                name: name.clone(),
                status: "failed",
                hash: None,
                bounds: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Batch report printed with `--json`
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub outcome: &'static str,
    pub built: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub symbols: Vec<SymbolReport>,
    pub cache: CacheSummary,
}

impl RebuildReport {
    pub fn new(events: &[RebuildEvent], outcome: &RebuildOutcome, cache: CacheSummary) -> Self {
        let symbols: Vec<SymbolReport> = events.iter().map(SymbolReport::from).collect();
        let failed = symbols.iter().filter(|s| s.status == "failed").count();
        let (label, error) = match outcome {
            RebuildOutcome::Completed { .. } => ("completed", None),
            RebuildOutcome::Stopped { .. } => ("stopped", None),
            RebuildOutcome::Cancelled { .. } => ("cancelled", None),
            RebuildOutcome::Aborted(err) => ("aborted", Some(err.to_string())),
        };
        Self {
            outcome: label,
            built: symbols.len() - failed,
            failed,
            error,
            symbols,
            cache,
        }
    }
}
