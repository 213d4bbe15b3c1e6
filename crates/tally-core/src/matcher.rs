use crate::types::{Embedding, KnownFaceEntry, MatchResult};

/// Nearest-neighbour matcher over the known faces.
///
/// Scans every entry and picks the smallest distance; the match is accepted
/// only when that distance is within `tolerance`.
pub struct NearestMatcher<F> {
    distance: F,
}

impl<F> NearestMatcher<F>
where
    F: Fn(&Embedding, &Embedding) -> f32,
{
    pub fn new(distance: F) -> Self {
        Self { distance }
    }

    pub fn compare(&self, query: &Embedding, gallery: &[KnownFaceEntry], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let dist = (self.distance)(query, &entry.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                name: Some(gallery[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                name: None,
            },
        }
    }
}
