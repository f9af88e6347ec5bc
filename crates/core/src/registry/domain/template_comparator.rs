use crate::shared::template::Template;

/// Domain interface to the recognition engine's template comparison.
///
/// Implementations are constructed once by the application (including any
/// one-time engine setup) and shared by every registry scan, hence `Sync`.
pub trait TemplateComparator: Send + Sync {
    /// Similarity of two templates in `[0, 1]`.
    fn similarity(&self, a: &Template, b: &Template) -> f64;

    /// Whether a template is good enough to enroll a new identity.
    fn is_valid(&self, template: &Template) -> bool;

    /// Highest similarity of `query` against any of `candidates`, 0 when
    /// there are none. Implementations with per-template setup cost override
    /// this to prepare the query once.
    fn best_similarity(&self, query: &Template, candidates: &[Template]) -> f64 {
        candidates
            .iter()
            .map(|c| self.similarity(query, c))
            .fold(0.0, f64::max)
    }
}
