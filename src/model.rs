use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tokenization strategy for the metrics engine.
///
/// `Linguistic` is the canonical behavior; `Simple` is an explicitly
/// degraded fallback that skips morphological normalization and produces
/// systematically higher unique-lemma counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerMode {
    #[default]
    Linguistic,
    Simple,
}

impl TokenizerMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linguistic => "linguistic",
            Self::Simple => "simple",
        }
    }
}

/// Named fluency calibration presets.
///
/// `V1` is the canonical linear clamp over a WPM range. `V2` reproduces a
/// historical variant that capped raw WPM at 100 and reported that as the
/// fluency score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPreset {
    #[default]
    V1,
    V2,
}

impl CalibrationPreset {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        }
    }
}

/// Output of one `compute_metrics` call. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub total_lemmas: usize,
    pub unique_lemmas: usize,
    pub median_frequency: f64,
    /// 0-100.
    pub fluency_score: u8,
    /// 0-100.
    pub vocabulary_score: u8,
    pub wpm: f64,
}

impl ScoreResult {
    /// The all-zero result produced for an empty transcript.
    #[must_use]
    pub fn degenerate() -> Self {
        Self {
            total_lemmas: 0,
            unique_lemmas: 0,
            median_frequency: 1.0,
            fluency_score: 0,
            vocabulary_score: 0,
            wpm: 0.0,
        }
    }
}

/// One skill to be evaluated by the (external) LLM scorer.
///
/// `prompt_template` uses a `{text}` placeholder for the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    pub prompt_template: String,
}

/// Result of one skill evaluation.
///
/// `score` is `None` when no `score: N` line could be extracted from the
/// scorer output; the raw feedback is kept either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEvaluation {
    pub skill: String,
    pub score: Option<u8>,
    pub feedback: String,
}

/// Where the spoken answer comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerSource {
    /// An audio file to be transcribed by the configured provider.
    AudioFile { path: PathBuf },
    /// A transcript already in hand, with its elapsed speaking time.
    Transcript { text: String, duration_minutes: f64 },
}

fn default_language() -> String {
    "fr".to_owned()
}

const fn default_min_wpm() -> f64 {
    30.0
}

const fn default_max_wpm() -> f64 {
    160.0
}

fn default_db_path() -> PathBuf {
    PathBuf::from("parlametric.sqlite3")
}

/// A full scoring-session request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub answer: AnswerSource,
    pub username: String,
    pub prompt_code: Option<String>,
    pub prompt_text: Option<String>,
    /// ISO language code for lemmatization and frequency lookup.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub tokenizer_mode: TokenizerMode,
    #[serde(default)]
    pub calibration: CalibrationPreset,
    #[serde(default = "default_min_wpm")]
    pub min_wpm: f64,
    #[serde(default = "default_max_wpm")]
    pub max_wpm: f64,
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    pub timeout_ms: Option<u64>,
}

impl SessionRequest {
    /// A minimal request scoring an inline transcript, nothing persisted.
    #[must_use]
    pub fn for_transcript(text: impl Into<String>, duration_minutes: f64) -> Self {
        Self {
            answer: AnswerSource::Transcript {
                text: text.into(),
                duration_minutes,
            },
            username: "anonymous".to_owned(),
            prompt_code: None,
            prompt_text: None,
            language: default_language(),
            tokenizer_mode: TokenizerMode::default(),
            calibration: CalibrationPreset::default(),
            min_wpm: default_min_wpm(),
            max_wpm: default_max_wpm(),
            skills: Vec::new(),
            persist: false,
            db_path: default_db_path(),
            timeout_ms: None,
        }
    }
}

/// One ordered event recorded while a session runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub seq: u64,
    pub ts_rfc3339: String,
    pub stage: String,
    pub code: String,
    pub message: String,
    pub payload: Value,
}

/// Everything produced by one scoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub started_at_rfc3339: String,
    pub finished_at_rfc3339: String,
    pub username: String,
    pub prompt_code: Option<String>,
    pub prompt_text: Option<String>,
    pub transcript: String,
    pub duration_minutes: f64,
    /// SHA-256 of the transcript bytes, for drift detection across reruns.
    pub transcript_sha256: String,
    pub metrics: ScoreResult,
    pub skills: Vec<SkillEvaluation>,
    pub events: Vec<SessionEvent>,
    pub warnings: Vec<String>,
}

/// Compact row for `sessions list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at_rfc3339: String,
    pub username: String,
    pub wpm: f64,
    pub fluency_score: u8,
    pub vocabulary_score: u8,
    pub transcript_preview: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tokenizer_mode_as_str_matches_serde() {
        for mode in [TokenizerMode::Linguistic, TokenizerMode::Simple] {
            let serialized = serde_json::to_string(&mode).unwrap();
            assert_eq!(serialized, format!("\"{}\"", mode.as_str()));
            let parsed: TokenizerMode = serde_json::from_str(&serialized).unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn calibration_preset_as_str_matches_serde() {
        for preset in [CalibrationPreset::V1, CalibrationPreset::V2] {
            let serialized = serde_json::to_string(&preset).unwrap();
            assert_eq!(serialized, format!("\"{}\"", preset.as_str()));
            let parsed: CalibrationPreset = serde_json::from_str(&serialized).unwrap();
            assert_eq!(parsed, preset);
        }
    }

    #[test]
    fn defaults_are_linguistic_v1() {
        assert_eq!(TokenizerMode::default(), TokenizerMode::Linguistic);
        assert_eq!(CalibrationPreset::default(), CalibrationPreset::V1);
    }

    #[test]
    fn score_result_degenerate_is_all_zero() {
        let result = ScoreResult::degenerate();
        assert_eq!(result.total_lemmas, 0);
        assert_eq!(result.unique_lemmas, 0);
        assert_eq!(result.median_frequency, 1.0);
        assert_eq!(result.fluency_score, 0);
        assert_eq!(result.vocabulary_score, 0);
        assert_eq!(result.wpm, 0.0);
    }

    #[test]
    fn score_result_serde_round_trip() {
        let result = ScoreResult {
            total_lemmas: 42,
            unique_lemmas: 30,
            median_frequency: 0.0021,
            fluency_score: 61,
            vocabulary_score: 74,
            wpm: 109.5,
        };
        let serialized = serde_json::to_string(&result).unwrap();
        let parsed: ScoreResult = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn answer_source_variants_round_trip() {
        let audio = AnswerSource::AudioFile {
            path: PathBuf::from("answer.wav"),
        };
        let value = serde_json::to_value(&audio).unwrap();
        assert_eq!(value["kind"], "audio_file");
        let parsed: AnswerSource = serde_json::from_value(value).unwrap();
        assert!(matches!(parsed, AnswerSource::AudioFile { ref path } if path.as_os_str() == "answer.wav"));

        let transcript = AnswerSource::Transcript {
            text: "bonjour tout le monde".to_owned(),
            duration_minutes: 0.5,
        };
        let value = serde_json::to_value(&transcript).unwrap();
        assert_eq!(value["kind"], "transcript");
        assert_eq!(value["duration_minutes"], 0.5);
    }

    #[test]
    fn session_request_defaults_fill_in() {
        let request_json = json!({
            "answer": {"kind": "transcript", "text": "salut", "duration_minutes": 1.0},
            "username": "lea",
            "prompt_code": null,
            "prompt_text": null,
            "timeout_ms": null
        });
        let request: SessionRequest = serde_json::from_value(request_json).unwrap();
        assert_eq!(request.language, "fr");
        assert_eq!(request.tokenizer_mode, TokenizerMode::Linguistic);
        assert_eq!(request.calibration, CalibrationPreset::V1);
        assert_eq!(request.min_wpm, 30.0);
        assert_eq!(request.max_wpm, 160.0);
        assert!(request.skills.is_empty());
        assert!(!request.persist);
    }

    #[test]
    fn for_transcript_builds_minimal_request() {
        let request = SessionRequest::for_transcript("le chat dort", 0.25);
        match &request.answer {
            AnswerSource::Transcript {
                text,
                duration_minutes,
            } => {
                assert_eq!(text, "le chat dort");
                assert_eq!(*duration_minutes, 0.25);
            }
            other => panic!("expected Transcript, got {other:?}"),
        }
        assert!(!request.persist);
        assert!(request.skills.is_empty());
    }

    #[test]
    fn skill_evaluation_none_score_round_trips() {
        let eval = SkillEvaluation {
            skill: "syntax".to_owned(),
            score: None,
            feedback: "no score line emitted".to_owned(),
        };
        let serialized = serde_json::to_string(&eval).unwrap();
        let parsed: SkillEvaluation = serde_json::from_str(&serialized).unwrap();
        assert!(parsed.score.is_none());
        assert_eq!(parsed.skill, "syntax");
    }

    #[test]
    fn session_event_serde_round_trip() {
        let event = SessionEvent {
            seq: 3,
            ts_rfc3339: "2026-03-01T10:30:00Z".to_owned(),
            stage: "metrics".to_owned(),
            code: "metrics.ok".to_owned(),
            message: "computed".to_owned(),
            payload: json!({"wpm": 92.0}),
        };
        let serialized = serde_json::to_string(&event).unwrap();
        let parsed: SessionEvent = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed.seq, 3);
        assert_eq!(parsed.code, "metrics.ok");
        assert_eq!(parsed.payload["wpm"], 92.0);
    }

    #[test]
    fn session_report_serde_round_trip() {
        let report = SessionReport {
            session_id: "s-1".to_owned(),
            started_at_rfc3339: "2026-03-01T10:00:00Z".to_owned(),
            finished_at_rfc3339: "2026-03-01T10:00:05Z".to_owned(),
            username: "lea".to_owned(),
            prompt_code: Some("A2-07".to_owned()),
            prompt_text: Some("Décrivez votre journée.".to_owned()),
            transcript: "je me lève à sept heures".to_owned(),
            duration_minutes: 0.2,
            transcript_sha256: "deadbeef".to_owned(),
            metrics: ScoreResult::degenerate(),
            skills: vec![SkillEvaluation {
                skill: "naturalness".to_owned(),
                score: Some(70),
                feedback: "sounds natural".to_owned(),
            }],
            events: vec![],
            warnings: vec!["short answer".to_owned()],
        };
        let serialized = serde_json::to_string(&report).unwrap();
        let parsed: SessionReport = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed.session_id, "s-1");
        assert_eq!(parsed.skills.len(), 1);
        assert_eq!(parsed.skills[0].score, Some(70));
        assert_eq!(parsed.warnings.len(), 1);
    }
}
