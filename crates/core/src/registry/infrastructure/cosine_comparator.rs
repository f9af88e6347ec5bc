//! Cosine-similarity comparator for embedding templates.
//!
//! Templates are little-endian `f32` vectors as produced by ArcFace-style
//! recognition models. The dot product is divided by both norms so templates
//! from engines that skip normalization still compare correctly.

use ndarray::ArrayView1;

use crate::registry::domain::template_comparator::TemplateComparator;
use crate::shared::template::Template;

pub struct CosineComparator {
    dim: usize,
}

impl CosineComparator {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Decodes `template` into `buf` and returns its L2 norm. `None` for
    /// templates of the wrong width, non-finite values or zero norm.
    fn decode_into(&self, template: &Template, buf: &mut Vec<f32>) -> Option<f32> {
        let bytes = template.as_bytes();
        if bytes.len() != self.dim * 4 {
            return None;
        }
        buf.clear();
        buf.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );
        if buf.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let v = ArrayView1::from(buf.as_slice());
        let norm = v.dot(&v).sqrt();
        (norm > 0.0 && norm.is_finite()).then_some(norm)
    }
}

impl TemplateComparator for CosineComparator {
    /// Negative cosine (opposite directions) clamps to 0. Malformed templates
    /// are never similar to anything.
    fn similarity(&self, a: &Template, b: &Template) -> f64 {
        let mut buf_a = Vec::with_capacity(self.dim);
        let mut buf_b = Vec::with_capacity(self.dim);
        match (
            self.decode_into(a, &mut buf_a),
            self.decode_into(b, &mut buf_b),
        ) {
            (Some(norm_a), Some(norm_b)) => cosine_similarity(&buf_a, norm_a, &buf_b, norm_b),
            _ => 0.0,
        }
    }

    fn is_valid(&self, template: &Template) -> bool {
        self.decode_into(template, &mut Vec::with_capacity(self.dim))
            .is_some()
    }

    /// Decodes the query once and reuses one buffer for every candidate.
    fn best_similarity(&self, query: &Template, candidates: &[Template]) -> f64 {
        let mut query_buf = Vec::with_capacity(self.dim);
        let Some(query_norm) = self.decode_into(query, &mut query_buf) else {
            return 0.0;
        };
        let mut buf = Vec::with_capacity(self.dim);
        candidates
            .iter()
            .filter_map(|c| {
                let norm = self.decode_into(c, &mut buf)?;
                Some(cosine_similarity(&query_buf, query_norm, &buf, norm))
            })
            .fold(0.0, f64::max)
    }
}

/// Cosine of two vectors given their norms, clamped to `[0, 1]`.
fn cosine_similarity(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f64 {
    let dot = ArrayView1::from(a).dot(&ArrayView1::from(b)) as f64;
    (dot / (norm_a as f64 * norm_b as f64)).clamp(0.0, 1.0)
}
