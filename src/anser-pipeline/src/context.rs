//! Pipeline context: everything a stage needs, threaded explicitly.
//!
//! No global state. Progress reporting, cancellation, soft-failure counters
//! and the compiled filters travel together in a [`PipelineEnv`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use common_error::{AnserError, AnserResult};
use common_progress::ProgressReporter;

use anser_core::{CompiledTagsFilter, WayPolygonConfig};
use anser_geometry::GeometryPredicate;

use crate::scheduler::GroupScheduler;
use crate::store::ShardStore;

/// Cooperative cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. In-flight group tasks finish their group, then
    /// the pipeline drains and returns `Cancelled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` when the signal is set. Stages call this at
    /// group boundaries.
    pub fn checkpoint(&self) -> AnserResult<()> {
        if self.is_cancelled() {
            Err(AnserError::cancelled("conversion cancelled"))
        } else {
            Ok(())
        }
    }
}

/// Soft-failure counters. Per-entity assembly problems never abort the run;
/// they land here and surface in the final summary.
#[derive(Debug, Default)]
pub struct SoftCounters {
    /// Ways dropped because a node ref did not resolve.
    pub unresolved_way_refs: AtomicU64,
    /// Ways dropped with fewer than two distinct vertices.
    pub degenerate_ways: AtomicU64,
    /// Relations skipped because a way member did not resolve.
    pub unresolved_relation_members: AtomicU64,
    /// Member fragments consumed by ring chains that never closed.
    pub discarded_ring_fragments: AtomicU64,
    /// Inner rings contained in no outer ring.
    pub orphan_inner_rings: AtomicU64,
    /// Geometries that came out empty after validity repair.
    pub dropped_empty_geometries: AtomicU64,
}

impl SoftCounters {
    /// Take a plain snapshot for reporting.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            unresolved_way_refs: self.unresolved_way_refs.load(Ordering::Relaxed),
            degenerate_ways: self.degenerate_ways.load(Ordering::Relaxed),
            unresolved_relation_members: self.unresolved_relation_members.load(Ordering::Relaxed),
            discarded_ring_fragments: self.discarded_ring_fragments.load(Ordering::Relaxed),
            orphan_inner_rings: self.orphan_inner_rings.load(Ordering::Relaxed),
            dropped_empty_geometries: self.dropped_empty_geometries.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of the soft-failure counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Ways dropped because a node ref did not resolve.
    pub unresolved_way_refs: u64,
    /// Ways dropped with fewer than two distinct vertices.
    pub degenerate_ways: u64,
    /// Relations skipped because a way member did not resolve.
    pub unresolved_relation_members: u64,
    /// Member fragments consumed by ring chains that never closed.
    pub discarded_ring_fragments: u64,
    /// Inner rings contained in no outer ring.
    pub orphan_inner_rings: u64,
    /// Geometries that came out empty after validity repair.
    pub dropped_empty_geometries: u64,
}

impl CounterSnapshot {
    /// Total soft failures across all categories.
    pub fn total(&self) -> u64 {
        self.unresolved_way_refs
            + self.degenerate_ways
            + self.unresolved_relation_members
            + self.discarded_ring_fragments
            + self.orphan_inner_rings
            + self.dropped_empty_geometries
    }
}

/// Shared stage environment.
pub struct PipelineEnv {
    /// Intermediate shard storage for this run.
    pub store: Arc<ShardStore>,
    /// Compiled tag filter, if any.
    pub tags_filter: Option<CompiledTagsFilter>,
    /// Prepared geometry filter, if any.
    pub geometry_filter: Option<Arc<GeometryPredicate>>,
    /// Closed-way polygon policy.
    pub polygon_config: WayPolygonConfig,
    /// Feature-id allowlist, if any.
    pub filter_osm_ids: Option<HashSet<String>>,
    /// Strip metadata tags from emitted tag sets.
    pub ignore_metadata_tags: bool,
    /// Rows-per-group used for shard partitioning at ingest. Fixed for the
    /// run; the scheduler's live value only shrinks batch chunking.
    pub partition_rows: usize,
    /// Batch sizing and memory budget.
    pub scheduler: Arc<GroupScheduler>,
    /// Soft-failure counters.
    pub counters: Arc<SoftCounters>,
    /// Cancellation signal.
    pub cancel: CancelToken,
    /// Progress reporter.
    pub progress: Arc<dyn ProgressReporter>,
}

impl PipelineEnv {
    /// Effective tag set of an entity: stripped of metadata tags unless
    /// configured otherwise.
    pub fn effective_tags(&self, raw: &anser_core::TagMap) -> anser_core::TagMap {
        if self.ignore_metadata_tags {
            anser_core::strip_metadata_tags(raw)
        } else {
            raw.clone()
        }
    }

    /// Whether a feature id passes the id allowlist.
    pub fn id_allowed(&self, feature_id: &str) -> bool {
        match &self.filter_osm_ids {
            Some(allowed) => allowed.contains(feature_id),
            None => true,
        }
    }

    /// Whether a tag map passes the tag predicate (vacuously true without a
    /// filter).
    pub fn tags_pass(&self, tags: &anser_core::TagMap) -> bool {
        match &self.tags_filter {
            Some(filter) => filter.matches(tags),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.checkpoint().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_counter_snapshot_total() {
        let counters = SoftCounters::default();
        counters.unresolved_way_refs.store(2, Ordering::Relaxed);
        counters.orphan_inner_rings.store(3, Ordering::Relaxed);
        assert_eq!(counters.snapshot().total(), 5);
    }
}
