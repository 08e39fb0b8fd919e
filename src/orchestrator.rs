//! Session pipeline: transcribe, score, evaluate skills, persist.
//!
//! A session is one spoken (or typed) answer moving through an ordered list
//! of stages. Stage selection is explicit and validated up front, so a
//! structurally impossible pipeline fails before any external command runs.

use std::fmt;
use std::fs;

use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{PmError, PmResult};
use crate::metrics::{MetricsConfig, TextMetricsEngine};
use crate::model::{
    AnswerSource, ScoreResult, SessionEvent, SessionReport, SessionRequest, SkillEvaluation,
};
use crate::provider::{CommandTranscriptionProvider, TranscriptionProvider};
use crate::scorer::SkillScorer;
use crate::storage::SessionStore;

/// One discrete step of a scoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStage {
    /// Turn an audio file into a transcript plus spoken duration.
    Transcribe,
    /// Run the deterministic text-metrics engine over the transcript.
    Metrics,
    /// Run LLM-backed skill evaluations over the transcript.
    Skills,
    /// Persist the session report to SQLite.
    Persist,
}

impl SessionStage {
    /// The stage label used in events and logging.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Metrics => "metrics",
            Self::Skills => "skills",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical execution order: everything enabled.
const DEFAULT_STAGES: [SessionStage; 4] = [
    SessionStage::Transcribe,
    SessionStage::Metrics,
    SessionStage::Skills,
    SessionStage::Persist,
];

/// Which stages run, in which order.
///
/// Use [`PipelineBuilder`] for ergonomic construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    stages: Vec<SessionStage>,
}

impl PipelineConfig {
    #[must_use]
    pub fn new(stages: Vec<SessionStage>) -> Self {
        Self { stages }
    }

    #[must_use]
    pub fn stages(&self) -> &[SessionStage] {
        &self.stages
    }

    #[must_use]
    pub fn has_stage(&self, stage: SessionStage) -> bool {
        self.stages.contains(&stage)
    }

    /// Validate structural soundness independent of any request.
    ///
    /// Rules enforced:
    /// - No duplicate stages.
    /// - When `Transcribe` is present it must precede `Metrics` and `Skills`.
    /// - `Persist` requires `Metrics` before it.
    pub fn validate(&self) -> PmResult<()> {
        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage) {
                return Err(PmError::InvalidRequest(format!(
                    "duplicate pipeline stage: {stage}"
                )));
            }
        }

        let pos = |s: SessionStage| self.stages.iter().position(|x| *x == s);

        if let Some(transcribe_pos) = pos(SessionStage::Transcribe) {
            for dependent in [SessionStage::Metrics, SessionStage::Skills] {
                if let Some(dependent_pos) = pos(dependent) {
                    if dependent_pos < transcribe_pos {
                        return Err(PmError::InvalidRequest(format!(
                            "{dependent} stage must come after Transcribe"
                        )));
                    }
                }
            }
        }

        if let Some(persist_pos) = pos(SessionStage::Persist) {
            match pos(SessionStage::Metrics) {
                Some(metrics_pos) if metrics_pos < persist_pos => {}
                _ => {
                    return Err(PmError::InvalidRequest(
                        "Persist stage requires Metrics before it".to_owned(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Validate this pipeline against a concrete request.
    ///
    /// `Metrics` and `Skills` need a transcript from somewhere: either the
    /// request carries one inline, or a `Transcribe` stage produces it.
    /// Conversely, `Transcribe` needs an audio file to work on.
    pub fn validate_for(&self, request: &SessionRequest) -> PmResult<()> {
        self.validate()?;

        let has_transcribe = self.has_stage(SessionStage::Transcribe);
        let needs_transcript =
            self.has_stage(SessionStage::Metrics) || self.has_stage(SessionStage::Skills);

        match &request.answer {
            AnswerSource::AudioFile { .. } => {
                if needs_transcript && !has_transcribe {
                    return Err(PmError::InvalidRequest(
                        "audio answer without a Transcribe stage leaves no transcript for \
                         Metrics/Skills"
                            .to_owned(),
                    ));
                }
            }
            AnswerSource::Transcript { .. } => {
                if has_transcribe {
                    return Err(PmError::InvalidRequest(
                        "Transcribe stage requires an audio answer, got an inline transcript"
                            .to_owned(),
                    ));
                }
            }
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: DEFAULT_STAGES.to_vec(),
        }
    }
}

/// Fluent constructor for [`PipelineConfig`].
pub struct PipelineBuilder {
    stages: Vec<SessionStage>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Start from the full default stage list (for subtraction).
    #[must_use]
    pub fn default_stages() -> Self {
        Self {
            stages: DEFAULT_STAGES.to_vec(),
        }
    }

    #[must_use]
    pub fn stage(mut self, stage: SessionStage) -> Self {
        self.stages.push(stage);
        self
    }

    #[must_use]
    pub fn without(mut self, stage: SessionStage) -> Self {
        self.stages.retain(|s| *s != stage);
        self
    }

    pub fn build(self) -> PmResult<PipelineConfig> {
        let config = PipelineConfig::new(self.stages);
        config.validate()?;
        Ok(config)
    }
}

/// Lightweight, `Send + Sync + Copy` handle for deadline checks inside
/// subprocess polling loops and long stages.
#[derive(Debug, Clone, Copy)]
pub struct CancellationToken {
    deadline: Option<chrono::DateTime<Utc>>,
}

impl CancellationToken {
    pub fn checkpoint(&self) -> PmResult<()> {
        if crate::cli::ShutdownController::is_shutting_down() {
            return Err(PmError::Cancelled(
                "session cancelled via Ctrl+C".to_owned(),
            ));
        }
        if let Some(deadline) = self.deadline {
            if Utc::now() >= deadline {
                return Err(PmError::Cancelled("session deadline exceeded".to_owned()));
            }
        }
        Ok(())
    }

    /// A token that only ever cancels on Ctrl+C.
    #[must_use]
    pub fn no_deadline() -> Self {
        Self { deadline: None }
    }

    /// A token whose deadline is `duration` from now.
    #[must_use]
    pub fn with_deadline_from_now(duration: std::time::Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self {
            deadline: Some(Utc::now() + chrono::Duration::milliseconds(millis)),
        }
    }

    fn from_timeout_ms(timeout_ms: Option<u64>) -> Self {
        match timeout_ms {
            Some(ms) => {
                Self::with_deadline_from_now(std::time::Duration::from_millis(ms))
            }
            None => Self::no_deadline(),
        }
    }
}

/// Ordered event recorder for one session.
struct EventLog {
    seq: u64,
    events: Vec<SessionEvent>,
    stage_start: Option<std::time::Instant>,
}

impl EventLog {
    fn new() -> Self {
        Self {
            seq: 0,
            events: Vec::new(),
            stage_start: None,
        }
    }

    fn mark_stage_start(&mut self) {
        self.stage_start = Some(std::time::Instant::now());
    }

    fn push(&mut self, stage: &str, code: &str, message: &str, mut payload: Value) {
        if let Value::Object(ref mut map) = payload {
            if let Some(start) = self.stage_start {
                map.insert(
                    "elapsed_ms".to_owned(),
                    json!(start.elapsed().as_millis() as u64),
                );
            }
        }

        self.seq += 1;
        self.events.push(SessionEvent {
            seq: self.seq,
            ts_rfc3339: Utc::now().to_rfc3339(),
            stage: stage.to_owned(),
            code: code.to_owned(),
            message: message.to_owned(),
            payload,
        });
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Runs scoring sessions end to end.
///
/// Collaborators are injected: any [`TranscriptionProvider`] and any
/// [`SkillScorer`] work, which keeps the pipeline testable without audio
/// files or an LLM on PATH.
pub struct ParlametricEngine {
    provider: Box<dyn TranscriptionProvider>,
    scorer: Option<Box<dyn SkillScorer>>,
    pipeline: PipelineConfig,
}

impl fmt::Debug for ParlametricEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParlametricEngine")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl Default for ParlametricEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ParlametricEngine {
    /// Engine with the default pipeline, the command-backed transcription
    /// provider, and a scorer only if `PARLAMETRIC_SCORER_BIN` is set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            provider: Box::new(CommandTranscriptionProvider::new(None)),
            scorer: crate::scorer::CommandSkillScorer::from_env()
                .map(|scorer| Box::new(scorer) as Box<dyn SkillScorer>),
            pipeline: PipelineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Box<dyn TranscriptionProvider>) -> Self {
        self.provider = provider;
        self
    }

    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn SkillScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Execute one scoring session.
    pub fn run(&self, request: &SessionRequest) -> PmResult<SessionReport> {
        self.pipeline.validate_for(request)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let token = CancellationToken::from_timeout_ms(request.timeout_ms);
        let mut log = EventLog::new();
        let mut warnings: Vec<String> = Vec::new();

        tracing::info!(
            session_id = %session_id,
            username = %request.username,
            language = %request.language,
            stages = ?self.pipeline.stages(),
            "session started"
        );
        log.push(
            "session",
            "session.start",
            "session started",
            json!({
                "session_id": session_id,
                "username": request.username,
                "language": request.language,
            }),
        );

        // --- Transcribe --------------------------------------------------
        token.checkpoint()?;
        let (transcript, duration_minutes) = self.resolve_transcript(
            request,
            &session_id,
            &token,
            &mut log,
            &mut warnings,
        )?;

        // --- Metrics ------------------------------------------------------
        token.checkpoint()?;
        let metrics = if self.pipeline.has_stage(SessionStage::Metrics) {
            log.mark_stage_start();
            let engine = TextMetricsEngine::new(MetricsConfig {
                mode: request.tokenizer_mode,
                language: request.language.clone(),
                min_wpm: request.min_wpm,
                max_wpm: request.max_wpm,
                calibration: request.calibration,
            })?;
            let metrics = engine.compute_metrics(&transcript, duration_minutes)?;
            tracing::info!(
                session_id = %session_id,
                wpm = metrics.wpm,
                fluency = metrics.fluency_score,
                vocabulary = metrics.vocabulary_score,
                "metrics computed"
            );
            log.push(
                "metrics",
                "metrics.ok",
                "metrics computed",
                json!({
                    "total_lemmas": metrics.total_lemmas,
                    "unique_lemmas": metrics.unique_lemmas,
                    "wpm": metrics.wpm,
                    "fluency_score": metrics.fluency_score,
                    "vocabulary_score": metrics.vocabulary_score,
                }),
            );
            metrics
        } else {
            warnings.push("metrics stage not in pipeline; scores are zeroed".to_owned());
            log.push("metrics", "metrics.skipped", "stage not selected", json!({}));
            ScoreResult::degenerate()
        };

        // --- Skills -------------------------------------------------------
        token.checkpoint()?;
        let skills = if self.pipeline.has_stage(SessionStage::Skills) {
            self.evaluate_skills(request, &transcript, &token, &mut log, &mut warnings)?
        } else {
            Vec::new()
        };

        let mut report = SessionReport {
            session_id: session_id.clone(),
            started_at_rfc3339: started_at.to_rfc3339(),
            finished_at_rfc3339: Utc::now().to_rfc3339(),
            username: request.username.clone(),
            prompt_code: request.prompt_code.clone(),
            prompt_text: request.prompt_text.clone(),
            transcript_sha256: sha256_hex(transcript.as_bytes()),
            transcript,
            duration_minutes,
            metrics,
            skills,
            events: Vec::new(),
            warnings: Vec::new(),
        };

        // --- Persist ------------------------------------------------------
        token.checkpoint()?;
        if self.pipeline.has_stage(SessionStage::Persist) {
            if request.persist {
                log.mark_stage_start();
                // Events and warnings so far ride along inside the stored row.
                report.events = log.events.clone();
                report.warnings = warnings.clone();
                let mut store = SessionStore::open(&request.db_path)?;
                store.upsert_report(&report)?;
                tracing::info!(
                    session_id = %session_id,
                    db_path = %request.db_path.display(),
                    "session persisted"
                );
                log.push(
                    "persist",
                    "persist.ok",
                    "session persisted",
                    json!({"db_path": request.db_path.display().to_string()}),
                );
            } else {
                log.push(
                    "persist",
                    "persist.skipped",
                    "persist flag not set on request",
                    json!({}),
                );
            }
        }

        log.push("session", "session.ok", "session finished", json!({}));
        report.finished_at_rfc3339 = Utc::now().to_rfc3339();
        report.events = log.events;
        report.warnings = warnings;
        Ok(report)
    }

    fn resolve_transcript(
        &self,
        request: &SessionRequest,
        session_id: &str,
        token: &CancellationToken,
        log: &mut EventLog,
        warnings: &mut Vec<String>,
    ) -> PmResult<(String, f64)> {
        match &request.answer {
            AnswerSource::Transcript {
                text,
                duration_minutes,
            } => {
                log.push(
                    "transcribe",
                    "transcribe.inline",
                    "transcript supplied inline",
                    json!({"duration_minutes": duration_minutes}),
                );
                Ok((text.clone(), *duration_minutes))
            }
            AnswerSource::AudioFile { path } => {
                if !self.pipeline.has_stage(SessionStage::Transcribe) {
                    // validate_for() only allows this when nothing downstream
                    // needs a transcript.
                    warnings.push("audio answer left untranscribed".to_owned());
                    return Ok((String::new(), 0.0));
                }

                if !self.provider.is_available() {
                    return Err(PmError::ProviderUnavailable(format!(
                        "transcription provider `{}` is not available",
                        self.provider.name()
                    )));
                }

                log.mark_stage_start();
                let work_dir = std::env::temp_dir().join(format!("parlametric-{session_id}"));
                fs::create_dir_all(&work_dir)?;
                let outcome =
                    self.provider
                        .transcribe(path, &request.language, &work_dir, token);
                let _ = fs::remove_dir_all(&work_dir);
                let outcome = outcome?;

                // Providers report seconds; everything downstream works in
                // minutes. Convert exactly once, here.
                let duration_minutes = outcome.duration_seconds / 60.0;
                log.push(
                    "transcribe",
                    "transcribe.ok",
                    "audio transcribed",
                    json!({
                        "provider": self.provider.name(),
                        "duration_seconds": outcome.duration_seconds,
                        "language": outcome.language,
                        "transcript_chars": outcome.transcript.len(),
                    }),
                );
                Ok((outcome.transcript, duration_minutes))
            }
        }
    }

    fn evaluate_skills(
        &self,
        request: &SessionRequest,
        transcript: &str,
        token: &CancellationToken,
        log: &mut EventLog,
        warnings: &mut Vec<String>,
    ) -> PmResult<Vec<SkillEvaluation>> {
        if request.skills.is_empty() {
            log.push(
                "skills",
                "skills.skipped",
                "no skills requested",
                json!({}),
            );
            return Ok(Vec::new());
        }

        let scorer = self.scorer.as_deref().ok_or_else(|| {
            PmError::ProviderUnavailable("no skill scorer configured".to_owned())
        })?;

        log.mark_stage_start();
        let mut evaluations = Vec::with_capacity(request.skills.len());
        let mut failures = 0usize;
        for skill in &request.skills {
            token.checkpoint()?;
            match scorer.evaluate(skill, transcript, token) {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(err @ PmError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    // One broken skill must not sink the session.
                    failures += 1;
                    warnings.push(format!("skill `{}` failed: {err}", skill.name));
                    evaluations.push(SkillEvaluation {
                        skill: skill.name.clone(),
                        score: None,
                        feedback: format!("evaluation failed: {err}"),
                    });
                }
            }
        }

        let code = if failures == 0 {
            "skills.ok"
        } else {
            "skills.partial"
        };
        log.push(
            "skills",
            code,
            "skill evaluations finished",
            json!({"requested": request.skills.len(), "failed": failures}),
        );
        Ok(evaluations)
    }
}
