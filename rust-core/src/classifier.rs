// Classifier seam and the adapter that turns raw classifier output into verdicts.
// The model behind `Classifier` is opaque; only its output shape is checked here.

use crate::error::ClassificationError;
use crate::verdict::{normalize_label, CategorySet, ContentKind, Verdict};
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw classifier output. Fields are optional because remote classifiers can
/// and do omit them; the adapter treats a missing field as malformed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawClassification {
    pub label: Option<String>,
    pub score: Option<f64>,
}

impl RawClassification {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: Some(label.into()),
            score: Some(score),
        }
    }
}

pub trait Classifier: Send + Sync {
    fn classify(&self, content: &[u8], kind: ContentKind) -> Result<RawClassification, ClassificationError>;

    /// Text embedded in an image. Empty when there is none.
    fn extract_text(&self, image: &[u8]) -> Result<String, ClassificationError>;
}

pub struct ClassifierAdapter {
    classifier: Arc<dyn Classifier>,
    threshold: f64,
    categories: CategorySet,
}

impl ClassifierAdapter {
    /// `threshold` is fixed for the adapter's lifetime so verdicts across a batch compare.
    pub fn new(classifier: Arc<dyn Classifier>, threshold: f64, categories: CategorySet) -> Self {
        Self {
            classifier,
            threshold,
            categories,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, content: &[u8], kind: ContentKind) -> Result<Verdict, ClassificationError> {
        let primary = self.classify_one(content, kind)?;
        if kind == ContentKind::Text {
            return Ok(primary);
        }

        let nested = match self.classifier.extract_text(content) {
            Ok(text) if text.trim().is_empty() => None,
            Ok(text) => Some(Box::new(self.classify_one(text.as_bytes(), ContentKind::Text)?)),
            Err(e) => {
                warn!(error = %e, "text extraction failed; image verdict has no nested verdict");
                None
            }
        };

        Ok(Verdict {
            nested_verdict: nested,
            ..primary
        })
    }

    fn classify_one(&self, content: &[u8], kind: ContentKind) -> Result<Verdict, ClassificationError> {
        let raw = self.classifier.classify(content, kind)?;
        let label = raw
            .label
            .ok_or_else(|| ClassificationError::Malformed("missing label".into()))?;
        let score = raw
            .score
            .ok_or_else(|| ClassificationError::Malformed("missing score".into()))?;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(ClassificationError::Malformed(format!(
                "score {} outside [0, 1]",
                score
            )));
        }

        let category = normalize_label(&label);
        if category.is_empty() {
            return Err(ClassificationError::Malformed("empty label".into()));
        }
        if !self.categories.contains(&category) {
            return Err(ClassificationError::UnknownCategory(category));
        }

        debug!(%kind, %category, score, "classified");
        Ok(Verdict {
            content_kind: kind,
            category,
            confidence: score,
            is_flagged: score > self.threshold,
            nested_verdict: None,
        })
    }
}
