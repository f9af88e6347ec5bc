/// Outcome of a registry match query.
///
/// No match is an absent key with confidence 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<K> {
    pub key: Option<K>,
    pub confidence: f64,
}

impl<K> MatchResult<K> {
    pub fn new(key: K, confidence: f64) -> Self {
        Self {
            key: Some(key),
            confidence,
        }
    }

    pub fn no_match() -> Self {
        Self {
            key: None,
            confidence: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.key.is_some()
    }

    /// Drops the key unless confidence reaches `threshold`.
    pub fn at_least(self, threshold: f64) -> Self {
        if self.key.is_some() && self.confidence >= threshold {
            self
        } else {
            Self::no_match()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_has_zero_confidence() {
        let m: MatchResult<String> = MatchResult::no_match();
        assert!(!m.is_match());
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn test_at_least_keeps_confident_match() {
        let m = MatchResult::new(7u32, 0.8).at_least(0.5);
        assert_eq!(m, MatchResult::new(7, 0.8));
    }

    #[test]
    fn test_at_least_drops_weak_match() {
        let m = MatchResult::new(7u32, 0.3).at_least(0.5);
        assert_eq!(m, MatchResult::no_match());
    }

    #[test]
    fn test_at_least_threshold_is_inclusive() {
        assert!(MatchResult::new(1u32, 0.5).at_least(0.5).is_match());
    }
}
