use std::collections::BTreeMap;
use std::sync::Arc;

use captionist_contracts::models::Tone;
use captionist_contracts::submissions::{
    CaptionSet, Fingerprint, SceneDescription, ValidatedImage,
};
use captionist_contracts::wire::{CaptionResponse, DescribeResponse, HistoryEntry};
use captionist_contracts::{CaptionError, CaptionResult};

use crate::config::EngineConfig;
use crate::dryrun::DryrunBackend;
use crate::http::HttpBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeOutcome {
    pub description: SceneDescription,
    /// Hash reported by the backend. Absent for first-time images.
    pub fingerprint: Option<Fingerprint>,
    pub duplicate: bool,
}

impl DescribeOutcome {
    pub fn from_wire(response: DescribeResponse) -> CaptionResult<Self> {
        if response.description.trim().is_empty() {
            return Err(CaptionError::semantic(
                "The caption service returned an empty description.",
            ));
        }
        Ok(Self {
            description: SceneDescription::new(response.description),
            fingerprint: response
                .image_hash
                .as_deref()
                .and_then(Fingerprint::from_reported),
            duplicate: response.is_duplicate,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionOutcome {
    pub captions: CaptionSet,
    pub reasoning: Option<String>,
}

impl CaptionOutcome {
    pub fn from_wire(response: CaptionResponse) -> CaptionResult<Self> {
        if let Some(error) = response.error {
            return Err(CaptionError::semantic(error));
        }
        Ok(Self {
            captions: CaptionSet::from(response.caption),
            reasoning: response.think,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionParams {
    pub description: SceneDescription,
    pub image_name: String,
    pub fingerprint: Option<Fingerprint>,
    pub tone: Option<Tone>,
    pub model_id: Option<String>,
}

/// Request/response contract of the caption service. Implementations never
/// retry; that is the orchestrator's call.
pub trait CaptionBackend: Send + Sync {
    fn name(&self) -> &str;
    fn describe(&self, image: &ValidatedImage) -> CaptionResult<DescribeOutcome>;
    fn caption(&self, params: &CaptionParams) -> CaptionResult<CaptionOutcome>;
    fn list_history(&self) -> CaptionResult<Vec<HistoryEntry>>;
    fn get_history(&self, id: &str) -> CaptionResult<HistoryEntry>;
    fn delete_history(&self, id: &str) -> CaptionResult<()>;
    fn clear_history(&self) -> CaptionResult<()>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn CaptionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: CaptionBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CaptionBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &EngineConfig) -> CaptionResult<BackendRegistry> {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend::new());
    backends.register(HttpBackend::new(&config.api_base, config.request_timeout)?);
    Ok(backends)
}
