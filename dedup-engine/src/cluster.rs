//! Greedy single-link clustering within one primary block.
//!
//! The walk is order-dependent by design: listings are visited in the fixed
//! traversal order `(brand_raw, name_normalized, source_id, external_id)`,
//! each unvisited listing seeds a cluster, and every later unvisited listing
//! joins the first seed it clears the threshold against. Re-running on the
//! same input therefore reproduces the same clusters.

use tracing::trace;

use crate::features::ListingFeatures;
use crate::scoring::{PairScore, PairScorer};

/// One clustered member: index into the block slice plus the score against
/// the cluster seed (`None` for the seed itself).
#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub index: usize,
    pub seed_score: Option<PairScore>,
}

/// A cluster of block members, seed first.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<ClusterMember>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Pair that scored in the dubious band (moderate similarity but below the
/// admission threshold); surfaced to the review queue.
#[derive(Debug, Clone)]
pub struct RejectedPair {
    pub left: usize,
    pub right: usize,
    pub score: PairScore,
}

/// Cluster a block already sorted in traversal order.
///
/// Returns the clusters and the rejected-but-plausible pairs (score ≥ 0.5
/// yet below `threshold`).
pub fn cluster_block(
    block: &[&ListingFeatures],
    scorer: &PairScorer,
    threshold: f64,
) -> (Vec<Cluster>, Vec<RejectedPair>) {
    let n = block.len();
    let mut visited = vec![false; n];
    let mut clusters = Vec::new();
    let mut rejected = Vec::new();

    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut members = vec![ClusterMember {
            index: seed,
            seed_score: None,
        }];

        for candidate in (seed + 1)..n {
            if visited[candidate] {
                continue;
            }
            let score = scorer.score(block[seed], block[candidate]);
            if score.score >= threshold {
                visited[candidate] = true;
                members.push(ClusterMember {
                    index: candidate,
                    seed_score: Some(score),
                });
            } else if score.score >= 0.5 {
                rejected.push(RejectedPair {
                    left: seed,
                    right: candidate,
                    score,
                });
            }
        }

        clusters.push(Cluster { members });
    }

    trace!(
        "cluster_block: {} listings -> {} clusters ({} dubious pairs)",
        n,
        clusters.len(),
        rejected.len()
    );
    (clusters, rejected)
}
