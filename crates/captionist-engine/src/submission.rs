//! The per-session submission state machine.
//!
//! The machine owns at most one [`ImageSubmission`]. Stage requests run
//! elsewhere; their outcomes come back tagged with the [`SubmissionId`] that
//! issued them and are applied only while that submission is still current
//! and still waiting on that stage. Everything else is reported as
//! [`Applied::Stale`] and dropped without touching state.

use std::fmt;

use captionist_contracts::models::SubmissionSettings;
use captionist_contracts::submissions::{
    fingerprint, AnalysisResult, Fingerprint, ImageFile, SceneDescription, ValidatedImage,
};
use captionist_contracts::wire::HistoryEntry;
use captionist_contracts::{CaptionError, CaptionResult};

use crate::backend::{CaptionOutcome, DescribeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionId(u64);

impl SubmissionId {
    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Uploaded,
    Analyzing,
    Result,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploaded => "uploaded",
            Self::Analyzing => "analyzing",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Describe,
    Caption,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Caption => "caption",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {event} while {from}")]
    Invalid { from: Phase, event: &'static str },
}

/// One image the user picked, validated and fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSubmission {
    id: SubmissionId,
    image: ValidatedImage,
    fingerprint: Fingerprint,
}

impl ImageSubmission {
    pub fn id(&self) -> SubmissionId {
        self.id
    }

    pub fn image(&self) -> &ValidatedImage {
        &self.image
    }

    pub fn file_name(&self) -> &str {
        self.image.name()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// Describe stage output, with the fingerprint settled: the backend's when
/// it reported one, the client's otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDescription {
    pub description: SceneDescription,
    pub fingerprint: Fingerprint,
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultOrigin {
    Pipeline { fingerprint: Fingerprint },
    History(HistoryEntry),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// `None` for failures raised before any request was made.
    pub stage: Option<Stage>,
    pub error: CaptionError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubmissionState {
    #[default]
    Idle,
    Uploaded {
        submission: ImageSubmission,
    },
    Analyzing {
        submission: ImageSubmission,
        settings: SubmissionSettings,
        awaiting: Stage,
        described: Option<ResolvedDescription>,
    },
    Result {
        submission: Option<ImageSubmission>,
        analysis: AnalysisResult,
        origin: ResultOrigin,
    },
    Error {
        submission: Option<ImageSubmission>,
        failure: Failure,
        description: Option<SceneDescription>,
    },
}

impl SubmissionState {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Uploaded { .. } => Phase::Uploaded,
            Self::Analyzing { .. } => Phase::Analyzing,
            Self::Result { .. } => Phase::Result,
            Self::Error { .. } => Phase::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeJob {
    pub ticket: SubmissionId,
    pub image: ValidatedImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionJob {
    pub ticket: SubmissionId,
    pub description: SceneDescription,
    pub image_name: String,
    pub fingerprint: Fingerprint,
    pub settings: SubmissionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The outcome belonged to a submission that is no longer current.
    Stale,
    Continue(CaptionJob),
    Settled(Phase),
}

/// Flattened view of a settled result, shaped like a history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryView {
    pub entry_id: Option<String>,
    pub source_file_name: String,
    pub description: String,
    pub primary_caption: String,
    pub reasoning: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Default)]
pub struct SubmissionMachine {
    state: SubmissionState,
    active: Option<SubmissionId>,
    next_id: u64,
}

impl SubmissionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SubmissionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn active_id(&self) -> Option<SubmissionId> {
        self.active
    }

    /// Stage the machine is waiting on, if a request is in flight.
    pub fn awaiting(&self) -> Option<(SubmissionId, Stage)> {
        match (&self.state, self.active) {
            (SubmissionState::Analyzing { awaiting, .. }, Some(id)) => Some((id, *awaiting)),
            _ => None,
        }
    }

    pub fn submission(&self) -> Option<&ImageSubmission> {
        match &self.state {
            SubmissionState::Idle => None,
            SubmissionState::Uploaded { submission }
            | SubmissionState::Analyzing { submission, .. } => Some(submission),
            SubmissionState::Result { submission, .. }
            | SubmissionState::Error { submission, .. } => submission.as_ref(),
        }
    }

    pub fn current_description(&self) -> Option<&SceneDescription> {
        match &self.state {
            SubmissionState::Analyzing { described, .. } => {
                described.as_ref().map(|resolved| &resolved.description)
            }
            SubmissionState::Result { analysis, .. } => Some(&analysis.description),
            SubmissionState::Error { description, .. } => description.as_ref(),
            _ => None,
        }
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        match &self.state {
            SubmissionState::Result { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.state {
            SubmissionState::Error { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Replaces whatever the machine held with a freshly picked file. An
    /// invalid file leaves the machine in `Error` with no submission.
    pub fn select_file(&mut self, file: ImageFile) -> CaptionResult<SubmissionId> {
        self.discard();
        let image = match file.validate() {
            Ok(image) => image,
            Err(error) => {
                self.state = SubmissionState::Error {
                    submission: None,
                    failure: Failure {
                        stage: None,
                        error: error.clone(),
                    },
                    description: None,
                };
                return Err(error);
            }
        };

        let id = self.allocate();
        let fingerprint = fingerprint(image.bytes());
        self.state = SubmissionState::Uploaded {
            submission: ImageSubmission {
                id,
                image,
                fingerprint,
            },
        };
        Ok(id)
    }

    pub fn start_analysis(
        &mut self,
        settings: SubmissionSettings,
    ) -> Result<DescribeJob, TransitionError> {
        let SubmissionState::Uploaded { submission } = &self.state else {
            return Err(self.invalid("start analysis"));
        };
        let job = DescribeJob {
            ticket: submission.id,
            image: submission.image.clone(),
        };
        let submission = submission.clone();
        self.state = SubmissionState::Analyzing {
            submission,
            settings,
            awaiting: Stage::Describe,
            described: None,
        };
        Ok(job)
    }

    pub fn apply_describe(
        &mut self,
        ticket: SubmissionId,
        outcome: CaptionResult<DescribeOutcome>,
    ) -> Applied {
        if !self.is_awaiting(ticket, Stage::Describe) {
            return Applied::Stale;
        }
        let (submission, settings) = match std::mem::take(&mut self.state) {
            SubmissionState::Analyzing {
                submission,
                settings,
                ..
            } => (submission, settings),
            other => {
                self.state = other;
                return Applied::Stale;
            }
        };

        match outcome {
            Ok(described) => {
                let fingerprint = described
                    .fingerprint
                    .unwrap_or_else(|| submission.fingerprint.clone());
                let job = CaptionJob {
                    ticket,
                    description: described.description.clone(),
                    image_name: submission.file_name().to_string(),
                    fingerprint: fingerprint.clone(),
                    settings,
                };
                self.state = SubmissionState::Analyzing {
                    submission,
                    settings,
                    awaiting: Stage::Caption,
                    described: Some(ResolvedDescription {
                        description: described.description,
                        fingerprint,
                        duplicate: described.duplicate,
                    }),
                };
                Applied::Continue(job)
            }
            Err(error) => {
                self.state = SubmissionState::Error {
                    submission: Some(submission),
                    failure: Failure {
                        stage: Some(Stage::Describe),
                        error,
                    },
                    description: None,
                };
                Applied::Settled(Phase::Error)
            }
        }
    }

    pub fn apply_caption(
        &mut self,
        ticket: SubmissionId,
        outcome: CaptionResult<CaptionOutcome>,
    ) -> Applied {
        if !self.is_awaiting(ticket, Stage::Caption) {
            return Applied::Stale;
        }
        let (submission, described) = match std::mem::take(&mut self.state) {
            SubmissionState::Analyzing {
                submission,
                described: Some(described),
                ..
            } => (submission, described),
            other => {
                self.state = other;
                return Applied::Stale;
            }
        };

        match outcome {
            Ok(captioned) => {
                let duplicate_of = described
                    .duplicate
                    .then(|| described.fingerprint.clone());
                self.state = SubmissionState::Result {
                    submission: Some(submission),
                    analysis: AnalysisResult::new(
                        described.description,
                        captioned.captions,
                        captioned.reasoning,
                        duplicate_of,
                    ),
                    origin: ResultOrigin::Pipeline {
                        fingerprint: described.fingerprint,
                    },
                };
                Applied::Settled(Phase::Result)
            }
            Err(error) => {
                self.state = SubmissionState::Error {
                    submission: Some(submission),
                    failure: Failure {
                        stage: Some(Stage::Caption),
                        error,
                    },
                    description: Some(described.description),
                };
                Applied::Settled(Phase::Error)
            }
        }
    }

    /// Back to `Idle`. Returns whether anything was discarded.
    pub fn reset(&mut self) -> bool {
        let had_state = !matches!(self.state, SubmissionState::Idle);
        self.discard();
        had_state
    }

    /// Shows a stored history entry as the current result, superseding any
    /// in-flight submission.
    pub fn rehydrate(&mut self, entry: HistoryEntry) -> SubmissionId {
        self.discard();
        let id = self.allocate();
        let analysis = AnalysisResult::rehydrated(
            SceneDescription::new(entry.description.clone()),
            entry.primary_caption.clone(),
            entry.reasoning.clone(),
        );
        self.state = SubmissionState::Result {
            submission: None,
            analysis,
            origin: ResultOrigin::History(entry),
        };
        id
    }

    pub fn history_view(&self) -> Option<HistoryView> {
        let SubmissionState::Result {
            submission,
            analysis,
            origin,
        } = &self.state
        else {
            return None;
        };
        let (entry_id, source_file_name, fingerprint) = match origin {
            ResultOrigin::Pipeline { fingerprint } => (
                None,
                submission
                    .as_ref()
                    .map(|value| value.file_name().to_string())
                    .unwrap_or_default(),
                Some(fingerprint.as_str().to_string()),
            ),
            ResultOrigin::History(entry) => (
                Some(entry.id.clone()),
                entry.source_file_name.clone(),
                entry.fingerprint.clone(),
            ),
        };
        Some(HistoryView {
            entry_id,
            source_file_name,
            description: analysis.description.raw().to_string(),
            primary_caption: analysis.primary_caption.clone(),
            reasoning: analysis.reasoning.clone(),
            fingerprint,
        })
    }

    fn is_awaiting(&self, ticket: SubmissionId, stage: Stage) -> bool {
        self.awaiting() == Some((ticket, stage))
    }

    fn allocate(&mut self) -> SubmissionId {
        self.next_id += 1;
        let id = SubmissionId(self.next_id);
        self.active = Some(id);
        id
    }

    fn discard(&mut self) {
        self.state = SubmissionState::Idle;
        self.active = None;
    }

    fn invalid(&self, event: &'static str) -> TransitionError {
        TransitionError::Invalid {
            from: self.phase(),
            event,
        }
    }
}
