use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

use captionist_contracts::models::Tone;
use captionist_contracts::submissions::{fingerprint, CaptionSet, SceneDescription, ValidatedImage};
use captionist_contracts::wire::HistoryEntry;
use captionist_contracts::{CaptionError, CaptionResult};

use crate::backend::{CaptionBackend, CaptionOutcome, CaptionParams, DescribeOutcome};

const HISTORY_LIMIT: usize = 50;
const HISTORY_CAPTION_MAX_CHARS: usize = 180;
const NOT_FOUND: &str = "History entry not found";

const PEOPLE: [&str; 4] = [
    "no people visible",
    "one person, smiling",
    "two friends side by side",
    "a small group",
];
const SETTINGS: [&str; 6] = [
    "a sunny beach",
    "a quiet city street",
    "a mountain trail",
    "a cozy kitchen",
    "a park at dusk",
    "a busy market",
];
const EMOTIONS: [&str; 4] = ["calm", "joyful", "reflective", "energetic"];
const ACTIONS: [&str; 4] = ["walking", "sharing a meal", "looking at the view", "laughing"];

/// Offline caption service. Keeps its own history in memory and flags
/// duplicates by SHA-256, so every flow works without a network.
#[derive(Default)]
pub struct DryrunBackend {
    history: Mutex<Vec<HistoryEntry>>,
}

impl DryrunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn history(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CaptionBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn describe(&self, image: &ValidatedImage) -> CaptionResult<DescribeOutcome> {
        let hash = fingerprint(image.bytes());
        let previous = self
            .history()
            .iter()
            .find(|entry| entry.fingerprint.as_deref() == Some(hash.as_str()))
            .cloned();
        if let Some(entry) = previous {
            return Ok(DescribeOutcome {
                description: SceneDescription::new(entry.description),
                fingerprint: Some(hash),
                duplicate: true,
            });
        }

        let seed = hash.as_str().as_bytes();
        let description = json!({
            "people": pick(seed, &PEOPLE, 0),
            "setting": pick(seed, &SETTINGS, 1),
            "emotion": pick(seed, &EMOTIONS, 2),
            "actions": pick(seed, &ACTIONS, 3),
            "overall_vibe": format!("{} moment", pick(seed, &EMOTIONS, 4)),
        });
        Ok(DescribeOutcome {
            description: SceneDescription::new(description.to_string()),
            fingerprint: None,
            duplicate: false,
        })
    }

    fn caption(&self, params: &CaptionParams) -> CaptionResult<CaptionOutcome> {
        if params.description.is_empty() {
            return Err(CaptionError::backend(400, "Description is required."));
        }

        let fields = params.description.fields();
        let summary = fields
            .get("setting")
            .cloned()
            .unwrap_or_else(|| params.description.raw().trim().to_string());
        let captions = dryrun_captions(&summary, params.tone);
        let reasoning = format!(
            "Dry run for {} (tone: {}, model: {}).",
            params.image_name,
            params.tone.map(Tone::key).unwrap_or("none"),
            params.model_id.as_deref().unwrap_or("default"),
        );

        let mut history = self.history();
        history.push(HistoryEntry {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            source_file_name: params.image_name.clone(),
            description: params.description.raw().to_string(),
            primary_caption: truncate_caption(captions.primary()),
            reasoning: Some(reasoning.clone()),
            fingerprint: params
                .fingerprint
                .as_ref()
                .map(|value| value.as_str().to_string()),
        });
        if history.len() > HISTORY_LIMIT {
            let overflow = history.len() - HISTORY_LIMIT;
            history.drain(..overflow);
        }

        Ok(CaptionOutcome {
            captions,
            reasoning: Some(reasoning),
        })
    }

    fn list_history(&self) -> CaptionResult<Vec<HistoryEntry>> {
        Ok(self.history().clone())
    }

    fn get_history(&self, id: &str) -> CaptionResult<HistoryEntry> {
        self.history()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or_else(|| CaptionError::backend(404, NOT_FOUND))
    }

    fn delete_history(&self, id: &str) -> CaptionResult<()> {
        let mut history = self.history();
        let before = history.len();
        history.retain(|entry| entry.id != id);
        if history.len() == before {
            return Err(CaptionError::backend(404, NOT_FOUND));
        }
        Ok(())
    }

    fn clear_history(&self) -> CaptionResult<()> {
        self.history().clear();
        Ok(())
    }
}

fn pick(seed: &[u8], options: &[&'static str], index: usize) -> &'static str {
    let byte = seed.get(index).copied().unwrap_or_default();
    options[byte as usize % options.len()]
}

fn dryrun_captions(summary: &str, tone: Option<Tone>) -> CaptionSet {
    let (suffix, tags) = match tone {
        Some(Tone::Instagram) => (" ✨", "#InstaMood #Vibes"),
        Some(Tone::Facebook) => (" Sharing this with everyone.", "#Memories"),
        Some(Tone::Linkedin) => (" A reminder to stay curious.", "#Growth #Perspective"),
        None => ("", "#Life"),
    };
    let clip = |max: usize| summary.chars().take(max).collect::<String>();
    [
        (
            "short",
            format!("Capturing moments in {}.{suffix} {tags}", clip(50)),
        ),
        (
            "story",
            format!(
                "Every journey tells a story. This one unfolds in {}.{suffix} {tags}",
                clip(30)
            ),
        ),
        (
            "philosophy",
            format!(
                "Life is about finding beauty in simple moments like {}. {tags}",
                clip(40)
            ),
        ),
        (
            "lifestyle",
            format!("Living life to the fullest in {}. {tags}", clip(35)),
        ),
        (
            "quote",
            format!("\"Inspiration is found in {}.\" {tags}", clip(40)),
        ),
    ]
    .into_iter()
    .map(|(key, text)| (key.to_string(), text))
    .collect()
}

fn truncate_caption(caption: &str) -> String {
    let trimmed = caption.trim();
    if trimmed.chars().count() <= HISTORY_CAPTION_MAX_CHARS {
        return trimmed.to_string();
    }
    trimmed
        .chars()
        .take(HISTORY_CAPTION_MAX_CHARS)
        .collect::<String>()
        + "..."
}
