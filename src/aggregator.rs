//! Concurrent fan-out over the data sources that apply to a brand.
//!
//! Every applicable source runs at once under its own timeout and the join
//! waits for all of them to settle. Each source owns one slot of the result;
//! a slot keeps its zero-valued default unless its source succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::UpstreamError;
use crate::sources::{AdapterResult, DataSource, SourceKind, SourceRequest};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub source: SourceKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    /// Every applicable source succeeded.
    Complete,
    /// Some sources failed; their slots hold defaults.
    Partial,
    /// Every applicable source failed.
    Failed,
    /// No source applied to the request.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated {
    slots: BTreeMap<SourceKind, Value>,
    outcomes: Vec<SourceOutcome>,
}

impl Aggregated {
    /// All `kinds` present with their default shapes.
    pub fn empty(kinds: &[SourceKind]) -> Self {
        Self {
            slots: kinds.iter().map(|k| (*k, k.default_slot())).collect(),
            outcomes: Vec::new(),
        }
    }

    pub fn merge(&mut self, kind: SourceKind, result: AdapterResult) {
        match (result.success, result.data) {
            (true, Some(data)) => {
                self.slots.insert(kind, data);
                self.record(SourceOutcome {
                    source: kind,
                    success: true,
                    error: None,
                });
            }
            (_, _) => {
                let error = result.error.unwrap_or_else(|| "no data returned".to_string());
                warn!(source = kind.name(), %error, "source failed, using default");
                self.slots.entry(kind).or_insert_with(|| kind.default_slot());
                self.record(SourceOutcome {
                    source: kind,
                    success: false,
                    error: Some(error),
                });
            }
        }
    }

    fn record(&mut self, outcome: SourceOutcome) {
        let at = self
            .outcomes
            .binary_search_by_key(&outcome.source, |o| o.source)
            .unwrap_or_else(|at| at);
        self.outcomes.insert(at, outcome);
    }

    pub fn slot(&self, kind: SourceKind) -> Value {
        self.slots
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_slot())
    }

    pub fn outcomes(&self) -> &[SourceOutcome] {
        &self.outcomes
    }

    pub fn status(&self) -> AggregateStatus {
        let failed = self.outcomes.iter().filter(|o| !o.success).count();
        match (self.outcomes.len(), failed) {
            (0, _) => AggregateStatus::Empty,
            (total, failed) if failed == total => AggregateStatus::Failed,
            (_, 0) => AggregateStatus::Complete,
            _ => AggregateStatus::Partial,
        }
    }
}

pub struct Aggregator {
    sources: Vec<Arc<dyn DataSource>>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(sources: Vec<Arc<dyn DataSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    /// Runs the sources for `kinds` that apply to the request's brand.
    pub async fn run(&self, request: &SourceRequest, kinds: &[SourceKind]) -> Aggregated {
        let applicable: Vec<&Arc<dyn DataSource>> = self
            .sources
            .iter()
            .filter(|s| kinds.contains(&s.kind()) && s.applies_to(&request.brand))
            .collect();
        debug!(
            brand = %request.brand.id,
            sources = applicable.len(),
            "starting fan-out"
        );

        let tasks = applicable.into_iter().map(|source| {
            let kind = source.kind();
            async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(self.timeout, source.fetch(request)).await {
                    Ok(result) => result,
                    Err(_) => AdapterResult::failed(UpstreamError::Timeout.to_string()),
                };
                debug!(
                    source = kind.name(),
                    success = result.success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "source settled"
                );
                (kind, result)
            }
        });

        let mut aggregated = Aggregated::empty(kinds);
        for (kind, result) in join_all(tasks).await {
            aggregated.merge(kind, result);
        }
        aggregated
    }
}
