use indexmap::IndexMap;

use super::selection::ModelChoice;

pub const DEFAULT_MODEL_A_ID: &str = "openai/gpt-oss-120b:together";
pub const DEFAULT_MODEL_B_ID: &str = "deepseek-ai/DeepSeek-R1:fireworks-ai";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub choice: ModelChoice,
    pub label: String,
    pub model_id: String,
    pub aliases: Vec<String>,
}

impl ModelSpec {
    pub fn matches(&self, raw: &str) -> bool {
        let needle = raw.trim();
        self.choice.key().eq_ignore_ascii_case(needle)
            || self.model_id.eq_ignore_ascii_case(needle)
            || self
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(needle))
    }
}

/// Maps the user-facing model choices onto backend model ids.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: IndexMap<ModelChoice, ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelCatalog {
    pub fn new(models: Option<IndexMap<ModelChoice, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn with_model_id(mut self, choice: ModelChoice, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if let Some(spec) = self.models.get_mut(&choice) {
            if !model_id.trim().is_empty() {
                spec.model_id = model_id.trim().to_string();
            }
        }
        self
    }

    pub fn get(&self, choice: ModelChoice) -> Option<&ModelSpec> {
        self.models.get(&choice)
    }

    pub fn model_id(&self, choice: ModelChoice) -> Option<&str> {
        self.get(choice).map(|spec| spec.model_id.as_str())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Resolves a model selection typed by a user. `none` and blank input
    /// select the backend default.
    pub fn resolve(&self, raw: &str) -> Result<Option<ModelChoice>, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        self.models
            .values()
            .find(|spec| spec.matches(trimmed))
            .map(|spec| Some(spec.choice))
            .ok_or_else(|| {
                let known = self
                    .models
                    .values()
                    .map(|spec| spec.choice.key())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Unknown model '{trimmed}'. Use one of: {known}, none.")
            })
    }
}

fn default_models() -> IndexMap<ModelChoice, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |choice: ModelChoice, label: &str, model_id: &str, aliases: &[&str]| {
        map.insert(
            choice,
            ModelSpec {
                choice,
                label: label.to_string(),
                model_id: model_id.to_string(),
                aliases: aliases.iter().map(|item| (*item).to_string()).collect(),
            },
        );
    };

    insert(
        ModelChoice::ModelA,
        "GPT-OSS 120B",
        DEFAULT_MODEL_A_ID,
        &["gpt-oss", "a"],
    );
    insert(
        ModelChoice::ModelB,
        "DeepSeek R1",
        DEFAULT_MODEL_B_ID,
        &["deepseek", "b"],
    );

    map
}
