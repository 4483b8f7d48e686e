//! Locality-aware node scoring (C2).

use parking_lot::RwLock;
use shardb_core::{Error, NodeId, Result};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// TTL for a registered client's location before it is considered stale.
const CLIENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Staleness window after which a node's metrics reset to defaults.
const METRICS_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// Latency sentinel used for location pairs absent from the static matrix.
const UNKNOWN_LOCATION_LATENCY_MS: f64 = 300.0;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

/// Per-node performance metrics feeding the locality score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeMetrics {
    pub latency_ms: f64,
    pub load_factor: f64,
    pub availability: f64,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self {
            latency_ms: 100.0,
            load_factor: 0.5,
            availability: 1.0,
        }
    }
}

impl NodeMetrics {
    /// Weighted score; lower is better. Unifies the two scoring variants
    /// observed in the source (`EdgeLocalityManager`, `LocalityAwareRouter`)
    /// on a single formula.
    #[must_use]
    pub fn score(&self) -> f64 {
        0.6 * self.latency_ms + 30.0 * self.load_factor + 100.0 * (1.0 - self.availability)
    }
}

struct TrackedNode {
    location: String,
    metrics: NodeMetrics,
    metrics_updated_at: i64,
}

struct ClientEntry {
    location: String,
    last_seen: i64,
}

/// Tracks per-node location and performance metrics and ranks candidates for
/// a given client's location.
#[derive(Default)]
pub struct LocalityScorer {
    nodes: RwLock<HashMap<NodeId, TrackedNode>>,
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl LocalityScorer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node(&self, node_id: NodeId, location: impl Into<String>) {
        let mut nodes = self.nodes.write();
        nodes.insert(
            node_id,
            TrackedNode {
                location: location.into(),
                metrics: NodeMetrics::default(),
                metrics_updated_at: now_ms(),
            },
        );
    }

    pub fn remove_node(&self, node_id: &NodeId) {
        self.nodes.write().remove(node_id);
    }

    /// Updates a tracked node's metrics. Updates for an unknown node are
    /// ignored (and logged), per spec.
    pub fn update_metrics(&self, node_id: &NodeId, metrics: NodeMetrics) {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(tracked) => {
                tracked.metrics = metrics;
                tracked.metrics_updated_at = now_ms();
            }
            None => tracing::warn!(%node_id, "ignoring metrics update for unregistered node"),
        }
    }

    /// Registers (or updates) a client's location, and opportunistically
    /// evicts client entries older than 24h.
    pub fn register_client(&self, client_id: impl Into<String>, location: impl Into<String>) {
        let mut clients = self.clients.write();
        let now = now_ms();
        clients.retain(|_, entry| now - entry.last_seen < CLIENT_TTL.as_millis() as i64);
        clients.insert(
            client_id.into(),
            ClientEntry {
                location: location.into(),
                last_seen: now,
            },
        );
    }

    fn effective_metrics(&self, tracked: &TrackedNode) -> NodeMetrics {
        let now = now_ms();
        if now - tracked.metrics_updated_at > METRICS_STALE_AFTER.as_millis() as i64 {
            NodeMetrics::default()
        } else {
            tracked.metrics
        }
    }

    /// Ranks `candidates` for `client_id` and returns the best match.
    pub fn get_optimal_node(&self, client_id: Option<&str>, candidates: &[NodeId]) -> Result<NodeId> {
        if candidates.is_empty() {
            return Err(Error::NoCandidates);
        }
        if candidates.len() == 1 {
            return Ok(candidates[0].clone());
        }

        let nodes = self.nodes.read();
        let tracked: Vec<&NodeId> = candidates
            .iter()
            .filter(|id| nodes.contains_key(*id))
            .collect();
        if tracked.is_empty() {
            return Ok(candidates[0].clone());
        }

        let client_location = client_id.and_then(|id| {
            self.clients
                .read()
                .get(id)
                .map(|entry| entry.location.clone())
        });

        if let Some(client_location) = client_location {
            let same_location: Vec<&NodeId> = tracked
                .iter()
                .copied()
                .filter(|id| nodes[*id].location == client_location)
                .collect();
            if !same_location.is_empty() {
                return Ok(self.pick_lowest_score(&same_location, &nodes));
            }
            return Ok(self.pick_lowest_adjusted_score(&tracked, &nodes, &client_location));
        }

        Ok(self.pick_lowest_score(&tracked, &nodes))
    }

    fn pick_lowest_score(
        &self,
        candidates: &[&NodeId],
        nodes: &HashMap<NodeId, TrackedNode>,
    ) -> NodeId {
        candidates
            .iter()
            .min_by(|a, b| {
                self.effective_metrics(&nodes[*a])
                    .score()
                    .partial_cmp(&self.effective_metrics(&nodes[*b]).score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|id| (*id).clone())
            .expect("candidates is non-empty, checked by caller")
    }

    fn pick_lowest_adjusted_score(
        &self,
        candidates: &[&NodeId],
        nodes: &HashMap<NodeId, TrackedNode>,
        client_location: &str,
    ) -> NodeId {
        candidates
            .iter()
            .min_by(|a, b| {
                let tracked_a = &nodes[*a];
                let tracked_b = &nodes[*b];
                let score_a = self.effective_metrics(tracked_a).score()
                    + location_distance(client_location, &tracked_a.location);
                let score_b = self.effective_metrics(tracked_b).score()
                    + location_distance(client_location, &tracked_b.location);
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|id| (*id).clone())
            .expect("candidates is non-empty, checked by caller")
    }
}

/// Static per-pair location latency (ms). Same location is always 0;
/// unmatched pairs fall back to the sentinel.
#[must_use]
pub fn location_distance(a: &str, b: &str) -> f64 {
    if a == b {
        return 0.0;
    }
    const MATRIX: &[(&str, &str, f64)] = &[
        ("us-east", "us-west", 60.0),
        ("us-east", "eu-west", 90.0),
        ("us-west", "eu-west", 140.0),
        ("eu-west", "ap-south", 160.0),
        ("us-east", "ap-south", 220.0),
        ("us-west", "ap-south", 170.0),
    ];
    MATRIX
        .iter()
        .find(|(x, y, _)| (x == &a && y == &b) || (x == &b && y == &a))
        .map(|(_, _, ms)| *ms)
        .unwrap_or(UNKNOWN_LOCATION_LATENCY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_candidate_short_circuits() {
        let scorer = LocalityScorer::new();
        let node = NodeId::new("A");
        assert_eq!(
            scorer.get_optimal_node(None, &[node.clone()]).unwrap(),
            node
        );
    }

    #[test]
    fn empty_candidates_fails() {
        let scorer = LocalityScorer::new();
        assert!(matches!(
            scorer.get_optimal_node(None, &[]),
            Err(Error::NoCandidates)
        ));
    }

    #[test]
    fn untracked_candidates_fall_back_to_first() {
        let scorer = LocalityScorer::new();
        let a = NodeId::new("A");
        let b = NodeId::new("B");
        assert_eq!(
            scorer.get_optimal_node(None, &[a.clone(), b]).unwrap(),
            a
        );
    }

    #[test]
    fn same_location_preferred_for_known_client() {
        let scorer = LocalityScorer::new();
        let a = NodeId::new("A");
        let b = NodeId::new("B");
        scorer.register_node(a.clone(), "us-east");
        scorer.register_node(b.clone(), "eu-west");
        scorer.register_client("client-1", "us-east");

        let chosen = scorer
            .get_optimal_node(Some("client-1"), &[a.clone(), b])
            .unwrap();
        assert_eq!(chosen, a);
    }

    #[test]
    fn lowest_score_picked_without_client_location() {
        let scorer = LocalityScorer::new();
        let a = NodeId::new("A");
        let b = NodeId::new("B");
        scorer.register_node(a.clone(), "us-east");
        scorer.register_node(b.clone(), "us-east");
        scorer.update_metrics(
            &a,
            NodeMetrics {
                latency_ms: 10.0,
                load_factor: 0.1,
                availability: 1.0,
            },
        );
        scorer.update_metrics(
            &b,
            NodeMetrics {
                latency_ms: 200.0,
                load_factor: 0.9,
                availability: 0.5,
            },
        );

        let chosen = scorer.get_optimal_node(None, &[a.clone(), b]).unwrap();
        assert_eq!(chosen, a);
    }

    #[test]
    fn metrics_update_for_unknown_node_is_ignored() {
        let scorer = LocalityScorer::new();
        let ghost = NodeId::new("ghost");
        scorer.update_metrics(
            &ghost,
            NodeMetrics {
                latency_ms: 1.0,
                load_factor: 0.0,
                availability: 1.0,
            },
        );
        // No panic, and the node still isn't tracked.
        assert!(scorer.nodes.read().get(&ghost).is_none());
    }
}
