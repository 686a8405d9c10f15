use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use uuid::Uuid;

use captionist_contracts::events::SessionEventLog;
use captionist_contracts::models::{ModelCatalog, SubmissionSettings};
use captionist_contracts::sessions::{SeenImage, SeenImageCache};
use captionist_contracts::submissions::{Fingerprint, ImageFile};
use captionist_contracts::{CaptionError, CaptionResult};

use crate::backend::{CaptionBackend, CaptionOutcome, CaptionParams, DescribeOutcome};
use crate::config::EngineConfig;
use crate::history::HistoryCache;
use crate::retry::RetryPolicy;
use crate::reveal::{RevealFrame, RevealPlan, RevealScheduler, RevealTiming};
use crate::submission::{
    Applied, CaptionJob, DescribeJob, Phase, Stage, SubmissionId, SubmissionMachine,
    TransitionError,
};

const SETTLE_POLL: Duration = Duration::from_millis(200);

enum StageMessage {
    Described {
        ticket: SubmissionId,
        outcome: CaptionResult<DescribeOutcome>,
    },
    Captioned {
        ticket: SubmissionId,
        outcome: CaptionResult<CaptionOutcome>,
    },
}

impl StageMessage {
    fn failed(ticket: SubmissionId, stage: Stage, error: CaptionError) -> Self {
        match stage {
            Stage::Describe => Self::Described {
                ticket,
                outcome: Err(error),
            },
            Stage::Caption => Self::Captioned {
                ticket,
                outcome: Err(error),
            },
        }
    }
}

/// Single owner of one session's submission state.
///
/// Stage requests run on short-lived worker threads and report back over a
/// channel; nothing is applied until the owner calls [`Orchestrator::pump`],
/// [`Orchestrator::wait_for_update`] or [`Orchestrator::settle`]. History
/// calls run inline on the owner thread.
pub struct Orchestrator {
    backend: Arc<dyn CaptionBackend>,
    catalog: ModelCatalog,
    retry: RetryPolicy,
    fresh_reveal: RevealTiming,
    rehydrated_reveal: RevealTiming,
    machine: SubmissionMachine,
    history: HistoryCache,
    reveal: RevealScheduler,
    seen: Option<SeenImageCache>,
    seen_before: Option<SeenImage>,
    events: SessionEventLog,
    sender: Sender<StageMessage>,
    receiver: Receiver<StageMessage>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn CaptionBackend>, config: &EngineConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            backend,
            catalog: config.catalog(),
            retry: config.retry_policy(),
            fresh_reveal: config.fresh_reveal(),
            rehydrated_reveal: config.rehydrated_reveal(),
            machine: SubmissionMachine::new(),
            history: HistoryCache::new(),
            reveal: RevealScheduler::new(),
            seen: None,
            seen_before: None,
            events: SessionEventLog::disabled(Uuid::new_v4().to_string()),
            sender,
            receiver,
        }
    }

    pub fn with_event_log(mut self, events: SessionEventLog) -> Self {
        self.events = events;
        self
    }

    /// Appends events to `path` under this session's id.
    pub fn with_event_file(mut self, path: impl Into<PathBuf>) -> Self {
        let session_id = self.events.session_id().to_string();
        self.events = SessionEventLog::new(path, session_id);
        self
    }

    pub fn with_seen_cache(mut self, cache: SeenImageCache) -> Self {
        self.seen = Some(cache);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn events(&self) -> &SessionEventLog {
        &self.events
    }

    pub fn machine(&self) -> &SubmissionMachine {
        &self.machine
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    /// What the local seen-image cache knew about the current file when it
    /// was selected.
    pub fn seen_before(&self) -> Option<&SeenImage> {
        self.seen_before.as_ref()
    }

    pub fn select_file(&mut self, file: ImageFile) -> CaptionResult<SubmissionId> {
        self.reveal.cancel();
        self.seen_before = None;
        let file_name = file.name.clone();
        let declared_type = file.declared_type.clone();

        let id = match self.machine.select_file(file) {
            Ok(id) => id,
            Err(err) => {
                self.emit(
                    "file_rejected",
                    json!({
                        "file_name": file_name,
                        "declared_type": declared_type,
                        "error": err.to_string(),
                    }),
                );
                return Err(err);
            }
        };

        let Some(submission) = self.machine.submission() else {
            return Ok(id);
        };
        let fingerprint = submission.fingerprint().clone();
        let media_type = submission.image().media_type().mime();
        let size = submission.image().len();
        self.seen_before = self
            .seen
            .as_mut()
            .and_then(|cache| cache.lookup(&fingerprint));
        self.emit(
            "file_selected",
            json!({
                "submission": id.get(),
                "file_name": file_name,
                "media_type": media_type,
                "bytes": size,
                "fingerprint": fingerprint.as_str(),
                "seen_before": self.seen_before.is_some(),
            }),
        );
        Ok(id)
    }

    pub fn start_analysis(
        &mut self,
        settings: SubmissionSettings,
    ) -> Result<SubmissionId, TransitionError> {
        let job = self.machine.start_analysis(settings)?;
        let ticket = job.ticket;
        tracing::info!(
            submission = %ticket,
            backend = self.backend.name(),
            tone = settings.tone_key(),
            model = settings.model_key(),
            "analysis started"
        );
        self.emit(
            "analysis_started",
            json!({
                "submission": ticket.get(),
                "tone": settings.tone_key(),
                "model": settings.model_key(),
            }),
        );
        self.dispatch_describe(job);
        Ok(ticket)
    }

    pub fn reset(&mut self) {
        self.reveal.cancel();
        self.seen_before = None;
        let previous = self.machine.active_id();
        if self.machine.reset() {
            self.emit(
                "submission_reset",
                json!({ "submission": previous.map(SubmissionId::get) }),
            );
        }
    }

    /// Applies every stage outcome that has already arrived. Returns how
    /// many were received, stale ones included.
    pub fn pump(&mut self) -> usize {
        let mut received = 0;
        while let Ok(message) = self.receiver.try_recv() {
            self.apply(message);
            received += 1;
        }
        received
    }

    /// Blocks up to `timeout` for one stage outcome, then drains the rest.
    pub fn wait_for_update(&mut self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => {
                self.apply(message);
                self.pump();
                true
            }
            Err(_) => false,
        }
    }

    /// Runs the pipeline until it leaves `Analyzing`. A stage still pending
    /// at the deadline fails with a transport error; its late outcome is
    /// then ignored as stale.
    pub fn settle(&mut self, timeout: Duration) -> Phase {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            let Some((ticket, stage)) = self.machine.awaiting() else {
                return self.phase();
            };
            let now = Instant::now();
            if now >= deadline {
                let error = CaptionError::transport(format!(
                    "{stage} request timed out after {:.1}s",
                    timeout.as_secs_f64()
                ));
                self.apply(StageMessage::failed(ticket, stage, error));
                return self.phase();
            }
            self.wait_for_update((deadline - now).min(SETTLE_POLL));
        }
    }

    pub fn reveal_frame(&mut self, now: Instant) -> Option<RevealFrame> {
        if self.phase() != Phase::Result {
            return None;
        }
        let owner = self.machine.active_id()?;
        self.reveal.frame(owner, now)
    }

    pub fn refresh_history(&mut self) -> CaptionResult<usize> {
        match self.history.refresh(self.backend.as_ref()) {
            Ok(count) => {
                self.emit("history_refreshed", json!({ "count": count }));
                Ok(count)
            }
            Err(err) => Err(self.history_failed("refresh", None, err)),
        }
    }

    /// Shows a stored entry as the current result. The in-flight submission,
    /// if any, is superseded.
    pub fn open_history_entry(&mut self, id: &str) -> CaptionResult<SubmissionId> {
        let entry = match self.history.fetch(self.backend.as_ref(), id) {
            Ok(entry) => entry,
            Err(err) => return Err(self.history_failed("open", Some(id), err)),
        };
        self.reveal.cancel();
        self.seen_before = None;
        let owner = self.machine.rehydrate(entry);
        self.arm_reveal(self.rehydrated_reveal);
        self.emit(
            "history_rehydrated",
            json!({ "entry_id": id, "submission": owner.get() }),
        );
        Ok(owner)
    }

    pub fn delete_history_entry(&mut self, id: &str) -> CaptionResult<()> {
        let removed = match self.history.delete(self.backend.as_ref(), id) {
            Ok(removed) => removed,
            Err(err) => return Err(self.history_failed("delete", Some(id), err)),
        };
        let fingerprint = removed
            .and_then(|entry| entry.fingerprint)
            .and_then(|raw| Fingerprint::from_reported(&raw));
        if let (Some(cache), Some(fingerprint)) = (self.seen.as_mut(), fingerprint) {
            if let Err(err) = cache.forget(&fingerprint) {
                tracing::warn!(error = %err, "seen-image cache update failed");
            }
        }
        self.emit("history_deleted", json!({ "entry_id": id }));
        Ok(())
    }

    pub fn clear_history(&mut self) -> CaptionResult<usize> {
        let removed = match self.history.clear(self.backend.as_ref()) {
            Ok(removed) => removed,
            Err(err) => return Err(self.history_failed("clear", None, err)),
        };
        if let Some(cache) = self.seen.as_mut() {
            if let Err(err) = cache.clear() {
                tracing::warn!(error = %err, "seen-image cache clear failed");
            }
        }
        self.emit("history_cleared", json!({ "count": removed.len() }));
        Ok(removed.len())
    }

    fn apply(&mut self, message: StageMessage) {
        match message {
            StageMessage::Described { ticket, outcome } => {
                let duplicate = outcome.as_ref().map(|value| value.duplicate).ok();
                let error = outcome.as_ref().err().cloned();
                match self.machine.apply_describe(ticket, outcome) {
                    Applied::Stale => self.stale(ticket, Stage::Describe),
                    Applied::Continue(job) => {
                        self.remember_seen(&job);
                        self.emit(
                            "describe_completed",
                            json!({
                                "submission": ticket.get(),
                                "duplicate": duplicate.unwrap_or(false),
                                "fingerprint": job.fingerprint.as_str(),
                            }),
                        );
                        self.dispatch_caption(job);
                    }
                    Applied::Settled(_) => {
                        self.stage_failed("describe_failed", ticket, error);
                    }
                }
            }
            StageMessage::Captioned { ticket, outcome } => {
                let error = outcome.as_ref().err().cloned();
                match self.machine.apply_caption(ticket, outcome) {
                    Applied::Stale => self.stale(ticket, Stage::Caption),
                    Applied::Settled(Phase::Result) => {
                        self.history.mark_stale();
                        self.arm_reveal(self.fresh_reveal);
                        let (primary, styles) = self
                            .machine
                            .analysis()
                            .map(|analysis| {
                                (analysis.primary_caption.clone(), analysis.captions.keys())
                            })
                            .unwrap_or_default();
                        tracing::info!(submission = %ticket, styles = styles.len(), "captions ready");
                        self.emit(
                            "caption_completed",
                            json!({
                                "submission": ticket.get(),
                                "primary_caption": primary,
                                "styles": styles,
                            }),
                        );
                    }
                    Applied::Settled(_) => {
                        self.stage_failed("caption_failed", ticket, error);
                    }
                    Applied::Continue(_) => {}
                }
            }
        }
    }

    fn dispatch_describe(&mut self, job: DescribeJob) {
        let ticket = job.ticket;
        let backend = Arc::clone(&self.backend);
        let retry = self.retry;
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name("captionist-describe".to_string())
            .spawn(move || {
                let outcome = retry.run("describe", || backend.describe(&job.image));
                let _ = sender.send(StageMessage::Described { ticket, outcome });
            });
        if let Err(err) = spawned {
            let error = CaptionError::transport(format!("describe worker spawn failed: {err}"));
            self.apply(StageMessage::failed(ticket, Stage::Describe, error));
        }
    }

    fn dispatch_caption(&mut self, job: CaptionJob) {
        let ticket = job.ticket;
        let params = CaptionParams {
            description: job.description,
            image_name: job.image_name,
            fingerprint: Some(job.fingerprint),
            tone: job.settings.tone,
            model_id: job
                .settings
                .model
                .and_then(|choice| self.catalog.model_id(choice))
                .map(str::to_string),
        };
        let backend = Arc::clone(&self.backend);
        let retry = self.retry;
        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name("captionist-caption".to_string())
            .spawn(move || {
                let outcome = retry.run("caption", || backend.caption(&params));
                let _ = sender.send(StageMessage::Captioned { ticket, outcome });
            });
        if let Err(err) = spawned {
            let error = CaptionError::transport(format!("caption worker spawn failed: {err}"));
            self.apply(StageMessage::failed(ticket, Stage::Caption, error));
        }
    }

    fn arm_reveal(&mut self, timing: RevealTiming) {
        let (Some(owner), Some(analysis)) = (self.machine.active_id(), self.machine.analysis())
        else {
            return;
        };
        let plan = RevealPlan::new(
            &analysis.description.readable(),
            analysis.reasoning.as_deref(),
            timing,
        );
        self.reveal.arm(owner, plan, Instant::now());
    }

    fn remember_seen(&mut self, job: &CaptionJob) {
        let Some(cache) = self.seen.as_mut() else {
            return;
        };
        if let Err(err) = cache.remember(&job.fingerprint, &job.image_name, job.description.raw())
        {
            tracing::warn!(error = %err, "seen-image cache update failed");
        }
    }

    fn stale(&self, ticket: SubmissionId, stage: Stage) {
        tracing::debug!(submission = %ticket, %stage, "stale stage outcome ignored");
        self.emit(
            "stale_response_ignored",
            json!({ "submission": ticket.get(), "stage": stage.as_str() }),
        );
    }

    fn stage_failed(&self, event_type: &str, ticket: SubmissionId, error: Option<CaptionError>) {
        let (kind, message) = error
            .map(|err| (err.kind(), err.to_string()))
            .unwrap_or(("unknown", String::new()));
        tracing::warn!(submission = %ticket, kind, %message, "{event_type}");
        self.emit(
            event_type,
            json!({
                "submission": ticket.get(),
                "error_kind": kind,
                "error": message,
            }),
        );
    }

    fn history_failed(&self, operation: &str, id: Option<&str>, err: CaptionError) -> CaptionError {
        tracing::warn!(operation, error = %err, "history request failed");
        self.emit(
            "history_failed",
            json!({
                "operation": operation,
                "entry_id": id,
                "error_kind": err.kind(),
                "error": err.to_string(),
            }),
        );
        err
    }

    fn emit(&self, event_type: &str, payload: Value) {
        self.events.record(event_type, map_object(payload));
    }
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::{Duration, Instant};

    use captionist_contracts::events::SessionEventLog;
    use captionist_contracts::models::{ModelChoice, SubmissionSettings, Tone, DEFAULT_MODEL_B_ID};
    use captionist_contracts::sessions::SeenImageCache;
    use captionist_contracts::submissions::{
        fingerprint, CaptionSet, Fingerprint, ImageFile, SceneDescription, ValidatedImage,
        NO_CAPTION_FALLBACK,
    };
    use captionist_contracts::wire::HistoryEntry;
    use captionist_contracts::{CaptionError, CaptionResult};
    use serde_json::Value;

    use super::Orchestrator;
    use crate::backend::{CaptionBackend, CaptionOutcome, CaptionParams, DescribeOutcome};
    use crate::config::EngineConfig;
    use crate::dryrun::DryrunBackend;
    use crate::retry::RetryPolicy;
    use crate::submission::{Phase, Stage};

    const SETTLE: Duration = Duration::from_secs(5);

    struct Scripted<T> {
        gate: Option<mpsc::Receiver<()>>,
        outcome: CaptionResult<T>,
    }

    impl<T> Scripted<T> {
        fn now(outcome: CaptionResult<T>) -> Self {
            Self {
                gate: None,
                outcome,
            }
        }

        fn gated(outcome: CaptionResult<T>) -> (Self, mpsc::Sender<()>) {
            let (release, gate) = mpsc::channel();
            (
                Self {
                    gate: Some(gate),
                    outcome,
                },
                release,
            )
        }

        fn resolve(self) -> CaptionResult<T> {
            if let Some(gate) = self.gate {
                let _ = gate.recv();
            }
            self.outcome
        }
    }

    /// Backend whose answers are scripted per file name.
    #[derive(Default)]
    struct ScriptedBackend {
        describe: Mutex<HashMap<String, Scripted<DescribeOutcome>>>,
        caption: Mutex<HashMap<String, Scripted<CaptionOutcome>>>,
        describe_calls: AtomicUsize,
        caption_params: Mutex<Vec<CaptionParams>>,
    }

    impl ScriptedBackend {
        fn on_describe(&self, name: &str, scripted: Scripted<DescribeOutcome>) {
            self.describe
                .lock()
                .unwrap()
                .insert(name.to_string(), scripted);
        }

        fn on_caption(&self, name: &str, scripted: Scripted<CaptionOutcome>) {
            self.caption
                .lock()
                .unwrap()
                .insert(name.to_string(), scripted);
        }
    }

    impl CaptionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn describe(&self, image: &ValidatedImage) -> CaptionResult<DescribeOutcome> {
            self.describe_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.describe.lock().unwrap().remove(image.name());
            match scripted {
                Some(scripted) => scripted.resolve(),
                None => Err(CaptionError::backend(500, "unscripted describe")),
            }
        }

        fn caption(&self, params: &CaptionParams) -> CaptionResult<CaptionOutcome> {
            self.caption_params.lock().unwrap().push(params.clone());
            let scripted = self.caption.lock().unwrap().remove(&params.image_name);
            match scripted {
                Some(scripted) => scripted.resolve(),
                None => Err(CaptionError::backend(500, "unscripted caption")),
            }
        }

        fn list_history(&self) -> CaptionResult<Vec<HistoryEntry>> {
            Ok(Vec::new())
        }

        fn get_history(&self, _id: &str) -> CaptionResult<HistoryEntry> {
            Err(CaptionError::backend(404, "History entry not found"))
        }

        fn delete_history(&self, _id: &str) -> CaptionResult<()> {
            Err(CaptionError::backend(404, "History entry not found"))
        }

        fn clear_history(&self) -> CaptionResult<()> {
            Ok(())
        }
    }

    fn described(text: &str) -> DescribeOutcome {
        DescribeOutcome {
            description: SceneDescription::new(text),
            fingerprint: None,
            duplicate: false,
        }
    }

    fn captioned(pairs: &[(&str, &str)]) -> CaptionOutcome {
        CaptionOutcome {
            captions: pairs
                .iter()
                .map(|(key, text)| (key.to_string(), text.to_string()))
                .collect(),
            reasoning: Some("thinking".to_string()),
        }
    }

    fn png(name: &str, bytes: &[u8]) -> ImageFile {
        ImageFile::new(name, "image/png", bytes.to_vec())
    }

    fn scripted_orchestrator(backend: &Arc<ScriptedBackend>) -> Orchestrator {
        let shared: Arc<dyn CaptionBackend> = backend.clone();
        Orchestrator::new(shared, &EngineConfig::default()).with_retry_policy(RetryPolicy::none())
    }

    fn dryrun_orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(DryrunBackend::new()), &EngineConfig::default())
    }

    fn event_types(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let raw = std::fs::read_to_string(path)?;
        raw.lines()
            .map(|line| {
                let value: Value = serde_json::from_str(line)?;
                Ok(value["type"].as_str().unwrap_or_default().to_string())
            })
            .collect()
    }

    #[test]
    fn dryrun_pipeline_reaches_result_and_logs_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut orchestrator =
            dryrun_orchestrator().with_event_log(SessionEventLog::new(&events_path, "s1"));

        orchestrator.select_file(png("beach.png", b"beach-bytes"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);

        let analysis = orchestrator.machine().analysis().unwrap();
        assert_eq!(analysis.captions.len(), 5);
        assert!(analysis.primary_caption.starts_with("Capturing moments"));
        assert_eq!(orchestrator.refresh_history()?, 1);

        let types = event_types(&events_path)?;
        assert_eq!(
            types,
            vec![
                "file_selected",
                "analysis_started",
                "describe_completed",
                "caption_completed",
                "history_refreshed",
            ]
        );
        Ok(())
    }

    #[test]
    fn reset_mid_flight_ignores_late_describe() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let backend = Arc::new(ScriptedBackend::default());
        let (slow, release) = Scripted::gated(Ok(described("D-A")));
        backend.on_describe("a.png", slow);
        backend.on_describe("b.png", Scripted::now(Ok(described("D-B"))));
        backend.on_caption("b.png", Scripted::now(Ok(captioned(&[("short", "c-b")]))));
        let mut orchestrator = scripted_orchestrator(&backend)
            .with_event_log(SessionEventLog::new(&events_path, "s1"));

        orchestrator.select_file(png("a.png", b"aaa"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        orchestrator.reset();
        assert_eq!(orchestrator.phase(), Phase::Idle);

        orchestrator.select_file(png("b.png", b"bbb"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);

        release.send(())?;
        assert!(orchestrator.wait_for_update(SETTLE));
        let analysis = orchestrator.machine().analysis().unwrap();
        assert_eq!(analysis.description.raw(), "D-B");
        assert_eq!(analysis.primary_caption, "c-b");
        assert!(event_types(&events_path)?.contains(&"stale_response_ignored".to_string()));
        Ok(())
    }

    #[test]
    fn duplicate_forwards_reported_fingerprint() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::default());
        let reported = Fingerprint::from_reported("abc").unwrap();
        backend.on_describe(
            "dup.png",
            Scripted::now(Ok(DescribeOutcome {
                description: SceneDescription::new("D0"),
                fingerprint: Some(reported.clone()),
                duplicate: true,
            })),
        );
        backend.on_caption("dup.png", Scripted::now(Ok(captioned(&[("short", "c1")]))));
        let mut orchestrator = scripted_orchestrator(&backend);

        orchestrator.select_file(png("dup.png", b"same"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);

        let analysis = orchestrator.machine().analysis().unwrap();
        assert_eq!(analysis.duplicate_of, Some(reported.clone()));
        assert_eq!(analysis.primary_caption, "c1");
        let params = backend.caption_params.lock().unwrap();
        assert_eq!(params[0].fingerprint, Some(reported));
        assert_eq!(params[0].description.raw(), "D0");
        Ok(())
    }

    #[test]
    fn semantic_caption_failure_keeps_description() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::default());
        backend.on_describe("x.png", Scripted::now(Ok(described("D1"))));
        backend.on_caption(
            "x.png",
            Scripted::now(Err(CaptionError::semantic("HF_TOKEN not set in environment."))),
        );
        let mut orchestrator = scripted_orchestrator(&backend);

        orchestrator.select_file(png("x.png", b"x"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Error);

        let machine = orchestrator.machine();
        let failure = machine.failure().unwrap();
        assert_eq!(failure.stage, Some(Stage::Caption));
        assert_eq!(failure.error.kind(), "semantic");
        assert_eq!(machine.current_description().unwrap().raw(), "D1");
        assert!(machine.analysis().is_none());
        assert!(orchestrator.reveal_frame(Instant::now()).is_none());
        Ok(())
    }

    #[test]
    fn invalid_file_never_reaches_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let mut orchestrator = scripted_orchestrator(&backend);

        let err = orchestrator
            .select_file(ImageFile::new("anim.gif", "image/gif", b"GIF89a".to_vec()))
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(orchestrator.phase(), Phase::Error);
        assert!(orchestrator
            .start_analysis(SubmissionSettings::default())
            .is_err());
        assert_eq!(backend.describe_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_caption_set_uses_fallback() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::default());
        backend.on_describe("x.png", Scripted::now(Ok(described("D1"))));
        backend.on_caption(
            "x.png",
            Scripted::now(Ok(CaptionOutcome {
                captions: CaptionSet::new(),
                reasoning: None,
            })),
        );
        let mut orchestrator = scripted_orchestrator(&backend);

        orchestrator.select_file(png("x.png", b"x"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);
        assert_eq!(
            orchestrator.machine().analysis().unwrap().primary_caption,
            NO_CAPTION_FALLBACK
        );
        Ok(())
    }

    #[test]
    fn selected_model_id_reaches_caption_request() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::default());
        backend.on_describe("x.png", Scripted::now(Ok(described("D1"))));
        backend.on_caption("x.png", Scripted::now(Ok(captioned(&[("short", "c1")]))));
        let mut orchestrator = scripted_orchestrator(&backend);

        orchestrator.select_file(png("x.png", b"x"))?;
        orchestrator.start_analysis(SubmissionSettings::new(None, Some(ModelChoice::ModelB)))?;
        orchestrator.settle(SETTLE);

        let params = backend.caption_params.lock().unwrap();
        assert_eq!(params[0].model_id.as_deref(), Some(DEFAULT_MODEL_B_ID));
        assert_eq!(params[0].tone, None);
        Ok(())
    }

    #[test]
    fn settle_deadline_fails_pending_stage() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::default());
        let (slow, release) = Scripted::gated(Ok(described("late")));
        backend.on_describe("x.png", slow);
        let mut orchestrator = scripted_orchestrator(&backend);

        orchestrator.select_file(png("x.png", b"x"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(Duration::from_millis(50)), Phase::Error);
        let failure = orchestrator.machine().failure().unwrap().clone();
        assert_eq!(failure.stage, Some(Stage::Describe));
        assert!(failure.error.is_transport());

        release.send(())?;
        assert!(orchestrator.wait_for_update(SETTLE));
        assert_eq!(orchestrator.phase(), Phase::Error);
        assert!(orchestrator.machine().current_description().is_none());
        Ok(())
    }

    #[test]
    fn history_entry_rehydrates_idempotently() -> anyhow::Result<()> {
        let mut orchestrator = dryrun_orchestrator();
        orchestrator.select_file(png("beach.png", b"beach"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        orchestrator.settle(SETTLE);
        orchestrator.refresh_history()?;
        let entry = orchestrator.history().entries().next().unwrap().clone();

        let started = Instant::now();
        orchestrator.open_history_entry(&entry.id)?;
        let first = orchestrator.machine().analysis().cloned().unwrap();
        assert_eq!(first.primary_caption, entry.primary_caption);
        assert_eq!(first.description.raw(), entry.description);
        let frame = orchestrator.reveal_frame(started).unwrap();
        assert_eq!(frame.description, 0);
        assert!(!frame.captions_visible);

        orchestrator.open_history_entry(&entry.id)?;
        assert_eq!(orchestrator.machine().analysis().cloned().unwrap(), first);
        let view = orchestrator.machine().history_view().unwrap();
        assert_eq!(view.entry_id.as_deref(), Some(entry.id.as_str()));
        assert_eq!(view.source_file_name, "beach.png");
        Ok(())
    }

    #[test]
    fn deleting_unknown_entry_fails_and_keeps_list() -> anyhow::Result<()> {
        let mut orchestrator = dryrun_orchestrator();
        orchestrator.select_file(png("beach.png", b"beach"))?;
        orchestrator.start_analysis(SubmissionSettings::default())?;
        orchestrator.settle(SETTLE);
        orchestrator.refresh_history()?;

        let err = orchestrator.delete_history_entry("missing").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(orchestrator.history().len(), 1);
        assert!(orchestrator.history().last_error().is_some());
        Ok(())
    }

    #[test]
    fn seen_cache_tracks_submissions_and_deletes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let seen_path = temp.path().join("seen.json");
        let mut orchestrator =
            dryrun_orchestrator().with_seen_cache(SeenImageCache::new(&seen_path));

        orchestrator.select_file(png("beach.png", b"beach"))?;
        assert!(orchestrator.seen_before().is_none());
        orchestrator.start_analysis(SubmissionSettings::default())?;
        orchestrator.settle(SETTLE);

        orchestrator.select_file(png("beach-again.png", b"beach"))?;
        let seen = orchestrator.seen_before().unwrap();
        assert_eq!(seen.file_name, "beach.png");
        assert_eq!(seen.submissions, 1);

        orchestrator.start_analysis(SubmissionSettings::default())?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);
        assert!(orchestrator.machine().analysis().unwrap().duplicate_of.is_some());

        orchestrator.refresh_history()?;
        let ids: Vec<String> = orchestrator
            .history()
            .entries()
            .map(|entry| entry.id.clone())
            .collect();
        for id in ids {
            orchestrator.delete_history_entry(&id)?;
        }
        orchestrator.select_file(png("beach.png", b"beach"))?;
        assert!(orchestrator.seen_before().is_none());
        Ok(())
    }

    #[test]
    fn duplicate_resubmission_with_new_tone_still_captions() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::default());
        let bytes = b"same-beach";
        let reported = fingerprint(bytes);
        backend.on_describe("beach.png", Scripted::now(Ok(described("D0"))));
        backend.on_caption("beach.png", Scripted::now(Ok(captioned(&[("short", "insta")]))));
        backend.on_describe(
            "beach-again.png",
            Scripted::now(Ok(DescribeOutcome {
                description: SceneDescription::new("D0"),
                fingerprint: Some(reported.clone()),
                duplicate: true,
            })),
        );
        backend.on_caption("beach-again.png", Scripted::now(Ok(captioned(&[("short", "fb")]))));
        let mut orchestrator = scripted_orchestrator(&backend);

        orchestrator.select_file(png("beach.png", bytes))?;
        orchestrator.start_analysis(SubmissionSettings::new(Some(Tone::Instagram), None))?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);

        orchestrator.select_file(png("beach-again.png", bytes))?;
        orchestrator.start_analysis(SubmissionSettings::new(Some(Tone::Facebook), None))?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);

        let analysis = orchestrator.machine().analysis().unwrap();
        assert_eq!(analysis.duplicate_of, Some(reported.clone()));
        assert_eq!(analysis.primary_caption, "fb");

        let params = backend.caption_params.lock().unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].tone, Some(Tone::Instagram));
        assert_eq!(params[1].tone, Some(Tone::Facebook));
        assert_eq!(params[1].fingerprint, Some(reported));
        assert_eq!(params[1].description.raw(), "D0");
        Ok(())
    }

    #[test]
    fn dryrun_duplicate_with_new_tone_reports_that_tone() -> anyhow::Result<()> {
        let mut orchestrator = dryrun_orchestrator();
        orchestrator.select_file(png("beach.png", b"beach"))?;
        orchestrator.start_analysis(SubmissionSettings::new(Some(Tone::Instagram), None))?;
        orchestrator.settle(SETTLE);

        orchestrator.select_file(png("beach.png", b"beach"))?;
        orchestrator.start_analysis(SubmissionSettings::new(Some(Tone::Facebook), None))?;
        assert_eq!(orchestrator.settle(SETTLE), Phase::Result);

        let analysis = orchestrator.machine().analysis().unwrap();
        assert_eq!(analysis.duplicate_of, Some(fingerprint(b"beach")));
        assert!(analysis
            .reasoning
            .as_deref()
            .unwrap_or_default()
            .contains("tone: facebook"));
        Ok(())
    }
}
