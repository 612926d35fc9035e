//! The search tree: one layer of ranked candidates per slot.

use crate::candidate::{normalize_annotation, Candidate};
use crate::slot::Slot;
use std::collections::HashSet;

/// Ranked predictions for one slot, as produced by a prediction service.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPrediction {
    pub slot: Slot,
    pub candidates: Vec<Candidate>,
}

impl SlotPrediction {
    pub fn new(slot: Slot, candidates: Vec<Candidate>) -> Self {
        Self { slot, candidates }
    }
}

/// Candidates for one slot. The last candidate is always the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLayer {
    pub slot: Slot,
    pub candidates: Vec<Candidate>,
}

impl SearchLayer {
    /// Keeps the `top_k` best distinct candidates and appends the sentinel.
    pub fn new(slot: Slot, mut ranked: Vec<Candidate>, top_k: usize) -> Self {
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen = HashSet::new();
        let mut candidates: Vec<Candidate> = ranked
            .into_iter()
            .filter(|c| {
                let normalized = normalize_annotation(&c.annotation);
                !normalized.is_empty() && seen.insert(normalized)
            })
            .take(top_k.max(1))
            .collect();
        candidates.push(Candidate::sentinel());
        Self { slot, candidates }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Ordered layers explored by the backtracking engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchTree {
    layers: Vec<SearchLayer>,
}

impl SearchTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tree from predictions, keeping prediction order.
    ///
    /// Predictions for slots outside `available` (already annotated, or not
    /// present in the source) are dropped, as are repeated slots.
    pub fn build(predictions: Vec<SlotPrediction>, available: &[Slot], top_k: usize) -> Self {
        let available: HashSet<&Slot> = available.iter().collect();
        let mut seen = HashSet::new();
        let mut tree = Self::new();
        for prediction in predictions {
            if !available.contains(&prediction.slot) {
                log::trace!("no open slot for prediction {}", prediction.slot);
                continue;
            }
            if !seen.insert(prediction.slot.clone()) {
                continue;
            }
            tree.push(SearchLayer::new(prediction.slot, prediction.candidates, top_k));
        }
        tree
    }

    pub fn push(&mut self, layer: SearchLayer) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, index: usize) -> &SearchLayer {
        &self.layers[index]
    }

    pub fn layers(&self) -> &[SearchLayer] {
        &self.layers
    }

    /// Total number of candidates across all layers, sentinels included.
    pub fn candidate_count(&self) -> usize {
        self.layers.iter().map(SearchLayer::len).sum()
    }
}
