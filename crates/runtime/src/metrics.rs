//! Token-savings estimation and process-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use catalog::{Catalog, ToolRef};
use serde_json::Value as Json;

use crate::host::json_chars;

/// Rough characters-per-token ratio used for every estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Compares what a direct tool-calling loop would push through a context
/// window with what a snippet returns.
///
/// The baseline is every catalog descriptor plus every raw tool output; the
/// actual cost is the descriptors of the tools used plus the result.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    catalog_chars: usize,
}

impl TokenEstimator {
    pub fn new(catalog: &Catalog) -> Self {
        let catalog_chars = catalog
            .descriptors()
            .map(|d| serde_json::to_value(d).map(|j| json_chars(&j)).unwrap_or(0))
            .sum();
        Self { catalog_chars }
    }

    pub fn estimate(
        &self,
        catalog: &Catalog,
        tools_used: &[ToolRef],
        raw_output_chars: usize,
        result: &Json,
    ) -> u64 {
        let used_chars: usize = tools_used
            .iter()
            .filter_map(|t| catalog.get(&t.server, &t.name))
            .map(|d| serde_json::to_value(d).map(|j| json_chars(&j)).unwrap_or(0))
            .sum();

        let baseline = (self.catalog_chars + raw_output_chars) / CHARS_PER_TOKEN;
        let actual = (used_chars + json_chars(result)) / CHARS_PER_TOKEN;
        baseline.saturating_sub(actual) as u64
    }
}

/// Counters shared by every execution of one runtime.
#[derive(Debug, Default)]
pub struct Metrics {
    tokens_saved: AtomicU64,
    executions: AtomicU64,
    failures: AtomicU64,
}

impl Metrics {
    pub fn record(&self, tokens_saved: u64, success: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if success {
            self.tokens_saved.fetch_add(tokens_saved, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_tokens_saved(&self) -> u64 {
        self.tokens_saved.load(Ordering::Relaxed)
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::ToolDescriptor;
    use serde_json::json;

    fn catalog() -> Catalog {
        let long = "x".repeat(400);
        Catalog::builder()
            .with(ToolDescriptor::new("a", "one", long.clone()), |_| Ok(json!([])))
            .unwrap()
            .with(ToolDescriptor::new("a", "two", long), |_| Ok(json!([])))
            .unwrap()
            .build()
    }

    #[test]
    fn unused_descriptors_count_as_savings() {
        let catalog = catalog();
        let estimator = TokenEstimator::new(&catalog);
        let used = [ToolRef::new("a", "one")];
        let saved = estimator.estimate(&catalog, &used, 0, &json!(null));
        assert!(saved >= 100, "saved {saved}");
    }

    #[test]
    fn large_raw_outputs_reduced_to_small_results_save_more() {
        let catalog = catalog();
        let estimator = TokenEstimator::new(&catalog);
        let used = [ToolRef::new("a", "one")];
        let small = estimator.estimate(&catalog, &used, 100, &json!({"count": 2}));
        let large = estimator.estimate(&catalog, &used, 40_000, &json!({"count": 2}));
        assert!(large > small + 9_000);
    }

    #[test]
    fn never_negative() {
        let catalog = Catalog::empty();
        let estimator = TokenEstimator::new(&catalog);
        let big = json!("y".repeat(10_000));
        assert_eq!(estimator.estimate(&catalog, &[], 0, &big), 0);
    }

    #[test]
    fn failures_do_not_add_savings() {
        let metrics = Metrics::default();
        metrics.record(10, true);
        metrics.record(99, false);
        assert_eq!(metrics.total_tokens_saved(), 10);
        assert_eq!(metrics.executions(), 2);
        assert_eq!(metrics.failures(), 1);
    }
}
