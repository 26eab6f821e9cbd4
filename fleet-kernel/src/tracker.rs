use crate::models::{BestNodeState, MetricReport, OptimalRecord};
use crate::registry::NodeRegistry;
use crate::scoring::{score, Criterion, ScoreWeights};
use tracing::debug;

/// Holds the global optimum, recomputed over the whole registry on demand.
#[derive(Debug, Clone, Default)]
pub struct BestNodeTracker {
    current: BestNodeState,
}

/// Outcome of one recomputation: the new optimum plus the winner's freshest
/// report, ready for the persistence sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub state: BestNodeState,
    pub record: Option<OptimalRecord>,
}

impl BestNodeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &BestNodeState {
        &self.current
    }

    /// Scores every node and keeps the minimum. Ties go to the node seen
    /// first by the registry; NaN scores never win.
    pub fn recompute(
        &mut self,
        registry: &NodeRegistry,
        criterion: Criterion,
        weights: &ScoreWeights,
        now: f64,
    ) -> Selection {
        let mut best: Option<(&MetricReport, f64)> = None;
        for report in registry.iter() {
            let node_score = score(report, criterion, weights);
            debug!(node_id = report.node_id(), score = node_score, "node scored");
            if node_score.is_nan() {
                continue;
            }
            if best.map_or(true, |(_, best_score)| node_score < best_score) {
                best = Some((report, node_score));
            }
        }

        self.current = match best {
            Some((report, best_score)) => BestNodeState {
                node_id: Some(report.node_id().to_string()),
                score: best_score,
                last_updated: Some(now),
            },
            None => BestNodeState {
                last_updated: Some(now),
                ..BestNodeState::default()
            },
        };

        // the registry keeps a single slot per node, which is its freshest report
        let record = best.map(|(report, best_score)| OptimalRecord::from_report(report, best_score));

        Selection {
            state: self.current.clone(),
            record,
        }
    }
}
