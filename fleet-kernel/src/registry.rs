//! Latest report per node, behind a per-node admission interval.

use crate::models::MetricReport;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    /// Minimum seconds between two accepted reports of the same node.
    interval: f64,
    /// One slot per node, in first-seen order.
    reports: Vec<MetricReport>,
    index: HashMap<String, usize>,
    /// Engine time of the last acceptance, not the report's own timestamp.
    last_accepted: HashMap<String, f64>,
}

impl NodeRegistry {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            interval: interval_secs,
            reports: Vec::new(),
            index: HashMap::new(),
            last_accepted: HashMap::new(),
        }
    }

    /// Would a report from `node_id` be accepted at `now`?
    /// A node never accepted before always is.
    pub fn is_due(&self, node_id: &str, now: f64) -> bool {
        match self.last_accepted.get(node_id) {
            Some(last) => now - last >= self.interval,
            None => true,
        }
    }

    /// Stores `report` if its node is due. Nothing changes on rejection.
    pub fn admit(&mut self, report: MetricReport, now: f64) -> bool {
        if !self.is_due(report.node_id(), now) {
            return false;
        }

        let node_id = report.node_id().to_string();
        match self.index.get(&node_id) {
            Some(&slot) => self.reports[slot] = report,
            None => {
                self.index.insert(node_id.clone(), self.reports.len());
                self.reports.push(report);
            }
        }
        self.last_accepted.insert(node_id, now);
        true
    }

    pub fn get(&self, node_id: &str) -> Option<&MetricReport> {
        self.index.get(node_id).map(|&slot| &self.reports[slot])
    }

    pub fn last_accepted(&self, node_id: &str) -> Option<f64> {
        self.last_accepted.get(node_id).copied()
    }

    /// Reports in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricReport> {
        self.reports.iter()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(node: &str, cpu: f64) -> MetricReport {
        MetricReport::new(node, cpu, 10.0, 100.0, 0.5, 0.0)
    }

    #[test]
    fn first_report_is_always_accepted() {
        let mut registry = NodeRegistry::new(60.0);
        assert!(registry.admit(report("n1", 1.0), 0.0));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.last_accepted("n1"), Some(0.0));
    }

    #[test]
    fn gates_reports_inside_interval() {
        let mut registry = NodeRegistry::new(60.0);
        assert!(registry.admit(report("n1", 1.0), 100.0));
        assert!(!registry.admit(report("n1", 2.0), 159.9));
        assert_eq!(registry.get("n1").unwrap().cpu_load(), 1.0);
        assert_eq!(registry.last_accepted("n1"), Some(100.0));

        assert!(registry.admit(report("n1", 3.0), 160.0));
        assert_eq!(registry.get("n1").unwrap().cpu_load(), 3.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn nodes_are_gated_independently() {
        let mut registry = NodeRegistry::new(60.0);
        assert!(registry.admit(report("a", 1.0), 10.0));
        assert!(registry.admit(report("b", 1.0), 10.5));
        assert!(!registry.admit(report("a", 1.0), 11.0));
        assert!(registry.admit(report("c", 1.0), 11.0));
        assert!(registry.admit(report("b", 2.0), 70.5));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn replaces_in_place_and_keeps_first_seen_order() {
        let mut registry = NodeRegistry::new(0.0);
        registry.admit(report("b", 1.0), 1.0);
        registry.admit(report("a", 1.0), 2.0);
        registry.admit(report("b", 9.0), 3.0);

        let order: Vec<&str> = registry.iter().map(|r| r.node_id()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(registry.get("b").unwrap().cpu_load(), 9.0);
    }
}
