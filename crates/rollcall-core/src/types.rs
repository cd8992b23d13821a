use serde::{Deserialize, Serialize};

/// Dimension of the ArcFace embedding vectors stored in the gallery.
pub const EMBEDDING_DIM: usize = 512;

/// Detected face region, with optional five-point facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// [left_eye, right_eye, nose, left_mouth, right_mouth], frame coordinates.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    /// True if the point lies inside the box (edges inclusive).
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// Face embedding vector produced by the embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Euclidean distance to another embedding. Lower = more similar.
    ///
    /// This is the metric the match tolerance is defined in: two embeddings
    /// of the same person land within ~0.5 of each other for ArcFace-style
    /// L2-normalized vectors.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A gallery identity: operator-supplied unique name plus stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Index of the matched record in the gallery (if any).
    pub index: Option<usize>,
    /// Name of the matched record (if any).
    pub name: Option<String>,
    /// Distance to the closest gallery entry, 0.0 for an empty gallery.
    pub distance: f32,
}

impl MatchResult {
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            index: None,
            name: None,
            distance,
        }
    }
}

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[IdentityRecord], tolerance: f32)
        -> MatchResult;
}

/// Nearest-distance matcher.
///
/// Scans the whole gallery and reports the entry with the smallest Euclidean
/// distance, matched iff that distance is within tolerance. The closest
/// entry wins even when several fall inside the tolerance.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[IdentityRecord],
        tolerance: f32,
    ) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in gallery.iter().enumerate() {
            let d = probe.distance(&record.embedding);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, d)) if d <= tolerance => MatchResult {
                matched: true,
                index: Some(idx),
                name: Some(gallery[idx].name.clone()),
                distance: d,
            },
            Some((_, d)) => MatchResult::no_match(d),
            None => MatchResult::no_match(0.0),
        }
    }
}
