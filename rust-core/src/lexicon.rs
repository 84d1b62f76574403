// Keyword classifier for development and tests.
// Text: the category with the most term hits wins, confidence 1 - 0.5^hits.
// Images: no pixel model; the primary verdict is `safe` at the baseline and
// text extraction pulls printable runs out of the raw bytes (metadata chunks).

use crate::classifier::{Classifier, RawClassification};
use crate::config::LexiconConfig;
use crate::error::ClassificationError;
use crate::verdict::{normalize_label, ContentKind};
use std::collections::BTreeMap;

pub const SAFE: &str = "safe";
const MIN_RUN: usize = 4;

/// Container markers that show up as printable runs in PNG and JPEG files.
const CONTAINER_TAGS: &[&str] = &[
    "IHDR", "PLTE", "IDAT", "IEND", "tRNS", "cHRM", "gAMA", "iCCP", "sBIT", "sRGB", "cICP", "tEXt",
    "zTXt", "iTXt", "bKGD", "hIST", "pHYs", "sPLT", "eXIf", "tIME", "acTL", "fcTL", "fdAT", "JFIF",
    "JFXX", "Exif", "ICC_PROFILE", "Adobe", "8BIM",
];

#[derive(Clone, Debug)]
pub struct LexiconClassifier {
    baseline: f64,
    terms: BTreeMap<String, Vec<String>>,
}

impl LexiconClassifier {
    pub fn new(cfg: &LexiconConfig) -> Self {
        let terms = if cfg.terms.is_empty() {
            default_terms()
        } else {
            cfg.terms
                .iter()
                .map(|(cat, ts)| {
                    (
                        normalize_label(cat),
                        ts.iter().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect(),
                    )
                })
                .collect()
        };
        Self {
            baseline: cfg.baseline_score,
            terms,
        }
    }

    fn score_text(&self, text: &str) -> RawClassification {
        let lower = text.to_lowercase();
        let mut best: Option<(&str, u32)> = None;
        // BTreeMap order makes ties resolve to the alphabetically first category.
        for (cat, terms) in &self.terms {
            let hits: u32 = terms.iter().map(|t| lower.matches(t.as_str()).count() as u32).sum();
            if hits > 0 && best.map_or(true, |(_, h)| hits > h) {
                best = Some((cat.as_str(), hits));
            }
        }
        match best {
            Some((cat, hits)) => RawClassification::new(cat, 1.0 - 0.5f64.powi(hits.min(1_000) as i32)),
            None => RawClassification::new(SAFE, self.baseline),
        }
    }
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new(&LexiconConfig::default())
    }
}

impl Classifier for LexiconClassifier {
    fn classify(&self, content: &[u8], kind: ContentKind) -> Result<RawClassification, ClassificationError> {
        match kind {
            ContentKind::Text => {
                let text = std::str::from_utf8(content)
                    .map_err(|_| ClassificationError::Malformed("text content is not utf-8".into()))?;
                Ok(self.score_text(text))
            }
            ContentKind::Image => Ok(RawClassification::new(SAFE, self.baseline)),
        }
    }

    fn extract_text(&self, image: &[u8]) -> Result<String, ClassificationError> {
        let runs = printable_runs(image, MIN_RUN);
        let words: Vec<&str> = runs
            .iter()
            .map(|run| strip_container_tags(run))
            .filter(|run| run.len() >= MIN_RUN && is_word_like(run))
            .collect();
        Ok(words.join(" "))
    }
}

/// ASCII runs of printable characters at least `min` long.
pub fn printable_runs(bytes: &[u8], min: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for &b in bytes {
        if b == b' ' || b.is_ascii_graphic() {
            cur.push(b as char);
            continue;
        }
        if cur.trim().len() >= min {
            out.push(cur.trim().to_string());
        }
        cur.clear();
    }
    if cur.trim().len() >= min {
        out.push(cur.trim().to_string());
    }
    out
}

/// Drop container markers glued to either end of a run, e.g. `IDATx` or `tEXtComment`.
fn strip_container_tags(run: &str) -> &str {
    let mut s = run;
    loop {
        let before = s.len();
        for tag in CONTAINER_TAGS {
            s = s.strip_prefix(tag).unwrap_or(s);
            s = s.strip_suffix(tag).unwrap_or(s);
        }
        s = s.trim();
        if s.len() == before {
            return s;
        }
    }
}

// Compressed pixel data yields short printable noise; real text is mostly letters and spaces.
fn is_word_like(run: &str) -> bool {
    let wordy = run.bytes().filter(|b| b.is_ascii_alphabetic() || *b == b' ').count();
    wordy * 3 >= run.len() * 2
}

fn default_terms() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        ("hate_speech", &["vermin", "subhuman", "go back to"]),
        ("violence", &["kill", "shoot", "stab", "bomb"]),
        ("adult", &["nsfw", "explicit", "xxx"]),
        ("harassment", &["loser", "idiot", "nobody likes you", "buy now"]),
    ];
    table
        .iter()
        .map(|(cat, terms)| (cat.to_string(), terms.iter().map(|t| t.to_string()).collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_is_safe_at_baseline() {
        let c = LexiconClassifier::default();
        let out = c.classify(b"hello", ContentKind::Text).expect("classify");
        assert_eq!(out, RawClassification::new("safe", 0.05));
    }

    #[test]
    fn hits_raise_confidence() {
        let c = LexiconClassifier::default();
        let one = c.classify(b"I will shoot", ContentKind::Text).expect("classify");
        assert_eq!(one.label.as_deref(), Some("violence"));
        assert_eq!(one.score, Some(0.5));
        let two = c.classify(b"shoot and STAB", ContentKind::Text).expect("classify");
        assert_eq!(two.score, Some(0.75));
    }

    #[test]
    fn configured_terms_replace_defaults() {
        let mut cfg = LexiconConfig::default();
        cfg.terms.insert("Spam".into(), vec!["FREE MONEY".into()]);
        let c = LexiconClassifier::new(&cfg);
        let out = c.classify(b"free money inside", ContentKind::Text).expect("classify");
        assert_eq!(out.label.as_deref(), Some("spam"));
        let none = c.classify(b"shoot", ContentKind::Text).expect("classify");
        assert_eq!(none.label.as_deref(), Some("safe"));
    }

    #[test]
    fn extraction_finds_embedded_text() {
        let c = LexiconClassifier::default();
        let mut img = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];
        img.extend_from_slice(b"tEXt\0buy now\0");
        img.extend_from_slice(&[0xff, 0x00, 0x10]);
        let text = c.extract_text(&img).expect("extract");
        assert!(text.contains("buy now"), "got {:?}", text);
        assert_eq!(c.extract_text(&[0u8, 1, 2, 0xff]).expect("extract"), "");
    }

    #[test]
    fn container_tags_are_not_text() {
        let c = LexiconClassifier::default();
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0, 0x1f, 0x15, 0xc4, 0x89]);
        png.extend_from_slice(&[0, 0, 0, 10]);
        png.extend_from_slice(b"IDAT");
        png.extend_from_slice(&[0x78, 0x9c, 0x63, 0, 1, 0, 0, 5, 0, 1, 0x0d, 0x0a, 0x2d, 0xb4]);
        png.extend_from_slice(&[0, 0, 0, 0]);
        png.extend_from_slice(b"IEND");
        png.extend_from_slice(&[0xae, 0x42, 0x60, 0x82]);
        assert_eq!(c.extract_text(&png).expect("extract"), "");

        let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[0x01, 0x01, 0xff, 0xfe, 0x00, 0x0c]);
        jpeg.extend_from_slice(b"you idiot");
        let text = c.extract_text(&jpeg).expect("extract");
        assert_eq!(text, "you idiot");

        let mut commented = png.clone();
        commented.extend_from_slice(b"tEXtComment\0shoot now");
        assert_eq!(c.extract_text(&commented).expect("extract"), "Comment shoot now");
    }

    #[test]
    fn non_utf8_text_is_malformed() {
        let c = LexiconClassifier::default();
        assert!(matches!(
            c.classify(&[0xff, 0xfe], ContentKind::Text),
            Err(ClassificationError::Malformed(_))
        ));
    }
}
