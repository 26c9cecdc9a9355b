//! Node placement, retry backoff and utilisation math.
//!
//! Pure functions used by both stores when they pick a node for a job, and
//! by the scheduler's retry queue. Lives in `core` so both the PostgreSQL
//! and in-memory stores share one definition of "fits" and "best".

use std::time::Duration;

use crate::status::NodeStatus;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Capacity view
// ---------------------------------------------------------------------------

/// The subset of a node record that placement decisions depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacity {
    pub id: DbId,
    pub status: NodeStatus,
    pub max_concurrent: i32,
    pub current_load: i32,
}

impl NodeCapacity {
    /// Capacity units still free on this node.
    pub fn headroom(&self) -> i64 {
        i64::from(self.max_concurrent) - i64::from(self.current_load)
    }

    /// Whether a job needing `concurrency` units can be placed here now.
    ///
    /// Only ACTIVE nodes accept work, and the post-assignment load must
    /// stay within `max_concurrent`.
    pub fn fits(&self, concurrency: i32) -> bool {
        self.status == NodeStatus::Active
            && concurrency > 0
            && i64::from(self.current_load) + i64::from(concurrency)
                <= i64::from(self.max_concurrent)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick the node a job of `concurrency` units should be assigned to.
///
/// Among ACTIVE nodes with room, the one with the lowest `current_load`
/// wins; ties go to the lowest id. Returns `None` when nothing fits.
pub fn select_node<'a, I>(nodes: I, concurrency: i32) -> Option<DbId>
where
    I: IntoIterator<Item = &'a NodeCapacity>,
{
    nodes
        .into_iter()
        .filter(|node| node.fits(concurrency))
        .min_by_key(|node| (node.current_load, node.id))
        .map(|node| node.id)
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Delay before placement retry number `attempt` (1-based).
///
/// Doubles from `base` on every attempt and never exceeds `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

// ---------------------------------------------------------------------------
// Utilisation
// ---------------------------------------------------------------------------

/// Percentage of `total` capacity in use, `0.0` for an empty pool.
pub fn utilization_pct(used: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((used as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: DbId, max: i32, load: i32) -> NodeCapacity {
        NodeCapacity {
            id,
            status: NodeStatus::Active,
            max_concurrent: max,
            current_load: load,
        }
    }

    // -- fits -----------------------------------------------------------------

    #[test]
    fn fits_up_to_exact_capacity() {
        assert!(node(1, 100, 50).fits(50));
        assert!(!node(1, 100, 60).fits(50));
    }

    #[test]
    fn inactive_and_maintenance_nodes_never_fit() {
        let mut n = node(1, 100, 0);
        n.status = NodeStatus::Inactive;
        assert!(!n.fits(1));
        n.status = NodeStatus::Maintenance;
        assert!(!n.fits(1));
    }

    #[test]
    fn zero_concurrency_never_fits() {
        assert!(!node(1, 100, 0).fits(0));
    }

    // -- select_node ----------------------------------------------------------

    #[test]
    fn selects_least_loaded_candidate() {
        let nodes = [node(1, 100, 70), node(2, 100, 10), node(3, 100, 40)];
        assert_eq!(select_node(&nodes, 20), Some(2));
    }

    #[test]
    fn ties_go_to_lowest_id() {
        let nodes = [node(7, 100, 10), node(3, 100, 10), node(5, 100, 10)];
        assert_eq!(select_node(&nodes, 5), Some(3));
    }

    #[test]
    fn skips_nodes_without_room() {
        let nodes = [node(1, 10, 0), node(2, 100, 60)];
        // Node 1 is emptier but too small for the job.
        assert_eq!(select_node(&nodes, 30), Some(2));
    }

    #[test]
    fn none_when_nothing_fits() {
        let nodes = [node(1, 100, 60)];
        assert_eq!(select_node(&nodes, 50), None);
        assert_eq!(select_node(&[] as &[NodeCapacity], 1), None);
    }

    // -- backoff_delay --------------------------------------------------------

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(5);
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(1000));
        assert_eq!(backoff_delay(4, base, max), Duration::from_millis(4000));
        assert_eq!(backoff_delay(5, base, max), max);
        assert_eq!(backoff_delay(200, base, max), max);
    }

    // -- utilization_pct ------------------------------------------------------

    #[test]
    fn utilization_handles_empty_pool() {
        assert_eq!(utilization_pct(0, 0), 0.0);
        assert!((utilization_pct(60, 100) - 60.0).abs() < f64::EPSILON);
    }
}
