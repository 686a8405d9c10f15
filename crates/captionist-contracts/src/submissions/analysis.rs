use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::fingerprint::Fingerprint;

pub const NO_CAPTION_FALLBACK: &str = "No caption generated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptionStyle {
    Short,
    Narrative,
    Reflective,
    Lifestyle,
    Inspirational,
}

/// Tie-break used to pick the headline caption out of a caption set.
pub const PRIMARY_CAPTION_ORDER: [CaptionStyle; 5] = [
    CaptionStyle::Short,
    CaptionStyle::Narrative,
    CaptionStyle::Reflective,
    CaptionStyle::Lifestyle,
    CaptionStyle::Inspirational,
];

impl CaptionStyle {
    pub fn key(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Narrative => "narrative",
            Self::Reflective => "reflective",
            Self::Lifestyle => "lifestyle",
            Self::Inspirational => "inspirational",
        }
    }

    /// Wire keys that mean this style. The canonical key comes first; the
    /// rest are what the caption service actually emits.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Short => &["short"],
            Self::Narrative => &["narrative", "story"],
            Self::Reflective => &["reflective", "philosophy"],
            Self::Lifestyle => &["lifestyle"],
            Self::Inspirational => &["inspirational", "quote"],
        }
    }

    pub fn from_key(raw: &str) -> Option<Self> {
        let key = raw.trim();
        PRIMARY_CAPTION_ORDER.into_iter().find(|style| {
            style
                .aliases()
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(key))
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Short => "Short",
            Self::Narrative => "Narrative",
            Self::Reflective => "Reflective",
            Self::Lifestyle => "Lifestyle",
            Self::Inspirational => "Inspirational",
        }
    }
}

/// Captions keyed by style, in the order the backend returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptionSet(IndexMap<String, String>);

impl CaptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(style: CaptionStyle, text: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.insert(style.key(), text);
        set
    }

    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.0.insert(key.into(), text.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Text for a style, looked up through its aliases. Blank text counts as
    /// absent.
    pub fn style(&self, style: CaptionStyle) -> Option<&str> {
        style.aliases().iter().find_map(|alias| {
            self.0
                .iter()
                .find(|(key, text)| key.eq_ignore_ascii_case(alias) && !text.trim().is_empty())
                .map(|(_, text)| text.trim())
        })
    }

    pub fn primary(&self) -> &str {
        PRIMARY_CAPTION_ORDER
            .into_iter()
            .find_map(|style| self.style(style))
            .unwrap_or(NO_CAPTION_FALLBACK)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, text)| (key.as_str(), text.as_str()))
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for CaptionSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<IndexMap<String, String>> for CaptionSet {
    fn from(value: IndexMap<String, String>) -> Self {
        Self(value)
    }
}

const DESCRIPTION_LABELS: &[(&str, &str)] = &[
    ("people", "People"),
    ("subjects", "Subjects"),
    ("emotion", "Emotion"),
    ("setting", "Setting"),
    ("actions", "Actions"),
    ("overall_vibe", "Vibe"),
    ("overall_tone", "Tone"),
];

/// Scene description as returned by the describe stage. The backend sends a
/// JSON-encoded object of semantic fields, but free text is tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneDescription(String);

impl SceneDescription {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn raw(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Semantic fields, keyed by their JSON name. Empty when the description
    /// is not a JSON object.
    pub fn fields(&self) -> IndexMap<String, String> {
        let mut out = IndexMap::new();
        let Some(Value::Object(object)) = parse_description_json(&self.0) else {
            return out;
        };
        for (key, value) in object {
            if let Some(text) = field_text(&value) {
                out.insert(key, text);
            }
        }
        out
    }

    /// Human-readable rendering: known fields first under stable labels,
    /// then any other fields, one paragraph each.
    pub fn readable(&self) -> String {
        let mut fields = self.fields();
        if fields.is_empty() {
            return self.0.trim().to_string();
        }
        let mut parts = Vec::new();
        for (key, label) in DESCRIPTION_LABELS {
            if let Some(text) = fields.shift_remove(*key) {
                parts.push(format!("{label}: {text}"));
            }
        }
        for (key, text) in fields {
            parts.push(format!("{}: {text}", humanize_key(&key)));
        }
        parts.join("\n\n")
    }
}

fn parse_description_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(unfenced.trim()).ok()
}

fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text.trim().to_string(),
        Value::Array(rows) => rows
            .iter()
            .filter_map(field_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Object(_) => serde_json::to_string(value).ok()?,
    };
    if text.is_empty() {
        return None;
    }
    Some(text)
}

fn humanize_key(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Outcome of a fully settled describe-then-caption run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub description: SceneDescription,
    pub reasoning: Option<String>,
    pub captions: CaptionSet,
    pub primary_caption: String,
    pub duplicate_of: Option<Fingerprint>,
}

impl AnalysisResult {
    pub fn new(
        description: SceneDescription,
        captions: CaptionSet,
        reasoning: Option<String>,
        duplicate_of: Option<Fingerprint>,
    ) -> Self {
        let primary_caption = captions.primary().to_string();
        Self {
            description,
            reasoning: normalize_reasoning(reasoning),
            captions,
            primary_caption,
            duplicate_of,
        }
    }

    /// Result restored from a stored snapshot. The stored primary caption is
    /// kept verbatim, blank or padded, instead of being re-derived from
    /// `captions`.
    pub fn rehydrated(
        description: SceneDescription,
        primary_caption: impl Into<String>,
        reasoning: Option<String>,
    ) -> Self {
        let primary_caption = primary_caption.into();
        Self {
            description,
            reasoning: normalize_reasoning(reasoning),
            captions: CaptionSet::single(CaptionStyle::Short, primary_caption.clone()),
            primary_caption,
            duplicate_of: None,
        }
    }
}

fn normalize_reasoning(reasoning: Option<String>) -> Option<String> {
    reasoning
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
