//! Cache Warmer
//!
//! Pre-executes the hottest historical queries so the first interactive
//! lookups land in L1. Candidates come from the query log, filtered by
//! minimum frequency and ordered by `frequency * (1 + avg_latency_ms/1000)`:
//! slow frequent queries warm first. Warming is abortable and reports
//! progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::QueryEngine;
use crate::error::Result;
use crate::types::QueryOptions;

/// Outcome of one warming pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupReport {
    /// Log entries considered
    pub considered: usize,
    /// Queries actually pre-executed
    pub warmed: usize,
    /// Entries skipped because their fingerprint was already hot
    pub skipped: usize,
    /// Entries that failed to execute
    pub failed: usize,
    /// Whether the pass was aborted early
    pub aborted: bool,
}

/// Abortable query-log driven cache warmer.
pub struct CacheWarmer {
    abort: Arc<AtomicBool>,
}

impl Default for CacheWarmer {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheWarmer {
    pub fn new() -> Self {
        Self {
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for aborting a running pass from another task.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Request abort; the warmer stops before its next query.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Run one warming pass.
    ///
    /// `progress` is invoked as `(done, total)` after every attempted entry.
    pub async fn warm(
        &self,
        engine: &QueryEngine,
        top_n: usize,
        min_frequency: u64,
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<WarmupReport> {
        let mut report = WarmupReport::default();

        let mut entries = engine.store().top_queries(top_n, min_frequency)?;
        report.considered = entries.len();

        // Priority: frequency weighted by how slow the query has been
        entries.sort_by(|a, b| {
            let pa = a.count as f64 * (1.0 + a.avg_execution_time_ms / 1000.0);
            let pb = b.count as f64 * (1.0 + b.avg_execution_time_ms / 1000.0);
            pb.total_cmp(&pa)
        });

        let total = entries.len();
        info!("Warming cache from {} logged queries", total);

        for (done, entry) in entries.into_iter().enumerate() {
            if self.abort.load(Ordering::Acquire) {
                report.aborted = true;
                break;
            }

            // The stored fingerprint keys the cache directly; skip hot ones
            if engine.cache().contains_hot(&entry.query_hash) {
                report.skipped += 1;
                if let Some(cb) = progress.as_deref_mut() {
                    cb(done + 1, total);
                }
                continue;
            }

            let options: QueryOptions =
                serde_json::from_str(&entry.options_json).unwrap_or_default();

            match engine.semantic_query(&entry.text, &options).await {
                Ok(_) => {
                    debug!("Warmed '{}'", entry.text);
                    report.warmed += 1;
                }
                Err(e) => {
                    warn!("Warmup query '{}' failed: {}", entry.text, e);
                    report.failed += 1;
                }
            }

            if let Some(cb) = progress.as_deref_mut() {
                cb(done + 1, total);
            }
        }

        info!(
            "Warmup finished: {} warmed, {} skipped, {} failed{}",
            report.warmed,
            report.skipped,
            report.failed,
            if report.aborted { " (aborted)" } else { "" }
        );

        Ok(report)
    }
}
