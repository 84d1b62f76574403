use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
        }
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            ContentKind::Text => 1,
            ContentKind::Image => 2,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ContentKind::Text),
            2 => Some(ContentKind::Image),
            _ => None,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentKind::Text),
            "image" => Ok(ContentKind::Image),
            other => Err(format!("unsupported content type: {}", other)),
        }
    }
}

/// Canonical moderation outcome for one piece of content.
///
/// Built by [`crate::ClassifierAdapter`]; `nested_verdict` is only ever set on
/// image verdicts and is itself a text verdict without further nesting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub content_kind: ContentKind,
    pub category: String,
    pub confidence: f64,
    pub is_flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_verdict: Option<Box<Verdict>>,
}

impl Verdict {
    pub fn nested(&self) -> Option<&Verdict> {
        self.nested_verdict.as_deref()
    }
}

pub const DEFAULT_CATEGORIES: [&str; 5] = ["safe", "hate_speech", "violence", "adult", "harassment"];

/// The closed set of labels a verdict may carry. Extensible through configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorySet {
    names: BTreeSet<String>,
}

impl CategorySet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CategorySet {
            names: names
                .into_iter()
                .map(|n| normalize_label(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORIES)
    }
}

/// Trim, lower-case, and fold spaces and hyphens into underscores.
pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
