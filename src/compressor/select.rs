//! Segment scoring and MMR selection.
//!
//! Each segment gets a composite of recency, type, and task relevance; MMR
//! then trades that score against redundancy with what is already selected,
//! packing the selection budget without near-duplicates.

use super::embedding;
use super::segment::Segment;

/// Mixing coefficient: relevance vs redundancy.
pub const MMR_LAMBDA: f32 = 0.7;

const RECENCY_WEIGHT: f32 = 0.3;
const TYPE_WEIGHT: f32 = 0.3;
const RELEVANCE_WEIGHT: f32 = 0.4;

/// Per-segment selection state: embedding and composite score.
pub(super) struct Scored {
    pub vector: Vec<f32>,
    pub composite: f32,
}

/// Fill in recency/type/relevance scores and return embeddings + composites,
/// index-aligned with `segments`.
pub(super) fn score_segments(segments: &mut [Segment], current_task: &str) -> Vec<Scored> {
    let task_vector = embedding::embed(current_task);
    let count = segments.len();

    segments
        .iter_mut()
        .enumerate()
        .map(|(position, segment)| {
            segment.recency_score = if count <= 1 {
                1.0
            } else {
                position as f32 / (count - 1) as f32
            };
            segment.type_score = segment.kind.type_score();

            let vector = embedding::embed(&segment.text);
            segment.relevance_score = embedding::cosine(&vector, &task_vector).max(0.0);

            let composite = RECENCY_WEIGHT * segment.recency_score
                + TYPE_WEIGHT * segment.type_score
                + RELEVANCE_WEIGHT * segment.relevance_score;

            tracing::debug!(
                id = segment.id,
                kind = ?segment.kind,
                recency = segment.recency_score,
                relevance = segment.relevance_score,
                composite,
                "scored segment"
            );

            Scored { vector, composite }
        })
        .collect()
}

/// Maximal Marginal Relevance selection under a token budget.
///
/// Repeatedly picks the unselected segment maximizing
/// `lambda * composite - (1 - lambda) * max_sim(candidate, selected)`, with
/// ties broken by the lower segment id. Stops as soon as the next pick would
/// exceed `budget_tokens`. Returns selected ids in chronological order.
pub(super) fn select_mmr(
    segments: &[Segment],
    scored: &[Scored],
    budget_tokens: usize,
    lambda: f32,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..segments.len()).collect();
    let mut used_tokens = 0usize;

    while !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (slot, &index) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| embedding::cosine(&scored[index].vector, &scored[s].vector))
                .fold(0.0f32, f32::max);
            let value = lambda * scored[index].composite - (1.0 - lambda) * redundancy;
            let better = match best {
                None => true,
                // Strict > keeps the earliest (lowest-id) winner on ties.
                Some((_, best_value)) => value > best_value,
            };
            if better {
                best = Some((slot, value));
            }
        }

        let (slot, _) = best.expect("remaining is non-empty");
        let index = remaining[slot];
        if used_tokens + segments[index].token_count > budget_tokens {
            break;
        }
        used_tokens += segments[index].token_count;
        selected.push(index);
        remaining.remove(slot);
    }

    selected.sort_unstable();
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::segment::segment_history;
    use crate::types::Message;

    fn scored_segments(texts: &[&str], task: &str) -> (Vec<Segment>, Vec<Scored>) {
        let history: Vec<Message> = texts.iter().map(|t| Message::user(*t)).collect();
        let mut segments = segment_history(&history);
        let scored = score_segments(&mut segments, task);
        (segments, scored)
    }

    #[test]
    fn test_newest_segment_has_full_recency() {
        let (segments, _) = scored_segments(
            &["oldest paragraph here", "middle paragraph here", "newest paragraph here"],
            "task",
        );
        assert_eq!(segments[0].recency_score, 0.0);
        assert_eq!(segments[2].recency_score, 1.0);
        assert!(segments[1].recency_score > 0.0 && segments[1].recency_score < 1.0);
    }

    #[test]
    fn test_relevant_segments_outscore_irrelevant_at_equal_recency() {
        let (segments, scored) = scored_segments(
            &["the jwt refresh endpoint rotates tokens on every call"],
            "implement a jwt refresh endpoint",
        );
        assert_eq!(segments.len(), 1);
        assert!(segments[0].relevance_score > 0.2);
        assert!(scored[0].composite > 0.0);
    }

    #[test]
    fn test_selection_respects_budget() {
        let (segments, scored) = scored_segments(
            &[
                "first paragraph about the database schema and its migrations",
                "second paragraph about the api surface and handlers",
                "third paragraph about deployment and rollback procedures",
            ],
            "document the system",
        );
        let total: usize = segments.iter().map(|s| s.token_count).sum();
        let budget = total / 2;
        let picked = select_mmr(&segments, &scored, budget, MMR_LAMBDA);
        let used: usize = picked.iter().map(|&i| segments[i].token_count).sum();
        assert!(used <= budget);
        assert!(picked.len() < segments.len());
    }

    #[test]
    fn test_selection_is_chronological_and_deterministic() {
        let (segments, scored) = scored_segments(
            &["alpha paragraph one", "beta paragraph two", "gamma paragraph three"],
            "alpha beta gamma",
        );
        let a = select_mmr(&segments, &scored, usize::MAX / 2, MMR_LAMBDA);
        let b = select_mmr(&segments, &scored, usize::MAX / 2, MMR_LAMBDA);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(a.len(), segments.len());
    }

    #[test]
    fn test_zero_budget_selects_nothing() {
        let (segments, scored) = scored_segments(&["some paragraph"], "task");
        assert!(select_mmr(&segments, &scored, 0, MMR_LAMBDA).is_empty());
    }

    #[test]
    fn test_redundant_near_duplicate_is_penalized() {
        let (segments, scored) = scored_segments(
            &[
                "the cache layer uses redis with a five minute ttl",
                "the cache layer uses redis with a five minute ttl",
                "billing exports run nightly as csv files",
            ],
            "describe the cache layer",
        );
        // Budget fits two segments; the duplicate should lose to the novel one.
        let budget = segments[0].token_count + segments[2].token_count;
        let picked = select_mmr(&segments, &scored, budget, MMR_LAMBDA);
        assert_eq!(picked.len(), 2);
        assert!(picked.contains(&2), "novel segment displaced by a duplicate");
    }
}
