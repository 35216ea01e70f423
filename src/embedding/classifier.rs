//! Content heuristic that routes text to an embedding strategy.

use crate::embedding::EmbeddingStrategy;

/// Clinical and scientific vocabulary that marks biomedical text.
pub const BIOMEDICAL_TERMS: &[&str] = &[
    "clinical trial",
    "phase",
    "efficacy",
    "adverse event",
    "patient",
    "treatment",
    "therapy",
    "drug",
    "indication",
    "fda",
    "endpoint",
    "placebo",
    "randomized",
    "dose",
];

/// Classifies text as general business prose or biomedical content.
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    min_terms: usize,
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self { min_terms: 3 }
    }
}

impl ContentClassifier {
    /// Create a classifier that needs `min_terms` distinct vocabulary hits.
    pub fn new(min_terms: usize) -> Self {
        Self {
            min_terms: min_terms.max(1),
        }
    }

    /// Number of distinct biomedical terms in `text`.
    pub fn score(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        BIOMEDICAL_TERMS
            .iter()
            .filter(|term| lower.contains(*term))
            .count()
    }

    pub fn classify(&self, text: &str) -> EmbeddingStrategy {
        if self.score(text) >= self.min_terms {
            EmbeddingStrategy::Biomedical
        } else {
            EmbeddingStrategy::General
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let classifier = ContentClassifier::default();
        assert_eq!(
            classifier.classify("The Phase 3 randomized trial met its primary endpoint."),
            EmbeddingStrategy::Biomedical
        );
        assert_eq!(
            classifier.classify("Revenue grew 12% on higher patient volumes."),
            EmbeddingStrategy::General
        );
    }

    #[test]
    fn test_terms_count_once() {
        let classifier = ContentClassifier::default();
        assert_eq!(classifier.score("dose dose dose DOSE"), 1);
    }
}
