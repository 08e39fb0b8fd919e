//! Speech-to-text providers.
//!
//! The session pipeline is provider-agnostic: anything that can turn an audio
//! file into a transcript plus an elapsed duration satisfies
//! [`TranscriptionProvider`]. The shipped implementation shells out to a
//! whisper.cpp CLI and parses its JSON artifact.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::error::{PmError, PmResult};
use crate::orchestrator::CancellationToken;
use crate::process::{command_exists, run_command_cancellable};

const DEFAULT_WHISPER_BIN: &str = "whisper-cli";
const DEFAULT_TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(600);

/// What a provider hands back to the pipeline.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
    pub transcript: String,
    /// Elapsed speech duration in seconds, as measured by the provider.
    pub duration_seconds: f64,
    pub language: Option<String>,
}

pub trait TranscriptionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider can run in this environment (binary on PATH,
    /// service reachable, and so on).
    fn is_available(&self) -> bool;

    fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> PmResult<TranscriptionOutcome>;
}

/// Shells out to a whisper.cpp-compatible CLI (`-f <wav> -of <prefix> -oj`)
/// and reads the JSON artifact it writes next to the output prefix.
pub struct CommandTranscriptionProvider {
    binary: String,
    model_path: Option<String>,
    timeout: Duration,
}

impl CommandTranscriptionProvider {
    #[must_use]
    pub fn new(model_path: Option<String>) -> Self {
        Self {
            binary: binary(),
            model_path,
            timeout: DEFAULT_TRANSCRIBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_args(&self, audio_path: &Path, language: &str, output_prefix: &Path) -> Vec<String> {
        let mut args = vec![
            "-f".to_owned(),
            audio_path.display().to_string(),
            "-of".to_owned(),
            output_prefix.display().to_string(),
            // Always request JSON output since transcribe() parses it.
            "-oj".to_owned(),
            "-l".to_owned(),
            language.to_owned(),
        ];
        if let Some(model) = &self.model_path {
            args.push("-m".to_owned());
            args.push(model.clone());
        }
        args
    }
}

impl TranscriptionProvider for CommandTranscriptionProvider {
    fn name(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn transcribe(
        &self,
        audio_path: &Path,
        language: &str,
        work_dir: &Path,
        token: &CancellationToken,
    ) -> PmResult<TranscriptionOutcome> {
        if !audio_path.exists() {
            return Err(PmError::MissingArtifact(audio_path.to_path_buf()));
        }

        let output_prefix = work_dir.join("transcribe_output");
        let args = self.build_args(audio_path, language, &output_prefix);
        run_command_cancellable(&self.binary, &args, None, token, Some(self.timeout))?;

        let json_path = Path::new(&format!("{}.json", output_prefix.display())).to_path_buf();
        if !json_path.exists() {
            return Err(PmError::MissingArtifact(json_path));
        }

        let raw: Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        Ok(parse_transcription_json(&raw, language))
    }
}

fn binary() -> String {
    std::env::var("PARLAMETRIC_WHISPER_BIN").unwrap_or_else(|_| DEFAULT_WHISPER_BIN.to_owned())
}

/// Extract transcript text and the spoken duration from a whisper.cpp JSON
/// artifact. Duration is the end offset (ms) of the last segment; a missing
/// or empty segment list yields 0.0 seconds, which the metrics stage rejects.
fn parse_transcription_json(raw: &Value, requested_language: &str) -> TranscriptionOutcome {
    let segments = raw
        .get("transcription")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let transcript = raw
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            segments
                .iter()
                .filter_map(|segment| segment.get("text").and_then(Value::as_str))
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        });

    let last_offset_ms = segments
        .iter()
        .filter_map(|segment| segment.pointer("/offsets/to").and_then(Value::as_f64))
        .fold(0.0_f64, f64::max);

    let language = raw
        .pointer("/result/language")
        .or_else(|| raw.get("language"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| Some(requested_language.to_owned()));

    TranscriptionOutcome {
        transcript,
        duration_seconds: last_offset_ms / 1000.0,
        language,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_segment_offsets_into_seconds() {
        let raw = json!({
            "transcription": [
                {"offsets": {"from": 0, "to": 2000}, "text": " bonjour"},
                {"offsets": {"from": 2000, "to": 5500}, "text": " tout le monde"}
            ],
            "result": {"language": "fr"}
        });
        let outcome = parse_transcription_json(&raw, "fr");
        assert_eq!(outcome.transcript, "bonjour tout le monde");
        assert_eq!(outcome.duration_seconds, 5.5);
        assert_eq!(outcome.language.as_deref(), Some("fr"));
    }

    #[test]
    fn top_level_text_wins_over_segment_concatenation() {
        let raw = json!({
            "text": "  full transcript  ",
            "transcription": [
                {"offsets": {"from": 0, "to": 1000}, "text": " partial"}
            ]
        });
        let outcome = parse_transcription_json(&raw, "en");
        assert_eq!(outcome.transcript, "full transcript");
        assert_eq!(outcome.duration_seconds, 1.0);
    }

    #[test]
    fn empty_artifact_yields_zero_duration() {
        let raw = json!({});
        let outcome = parse_transcription_json(&raw, "fr");
        assert_eq!(outcome.transcript, "");
        assert_eq!(outcome.duration_seconds, 0.0);
        assert_eq!(outcome.language.as_deref(), Some("fr"));
    }

    #[test]
    fn out_of_order_segments_use_the_max_end_offset() {
        let raw = json!({
            "transcription": [
                {"offsets": {"from": 3000, "to": 4000}, "text": "b"},
                {"offsets": {"from": 0, "to": 1500}, "text": "a"}
            ]
        });
        let outcome = parse_transcription_json(&raw, "fr");
        assert_eq!(outcome.duration_seconds, 4.0);
    }

    #[test]
    fn build_args_includes_model_and_language() {
        let provider = CommandTranscriptionProvider {
            binary: "whisper-cli".to_owned(),
            model_path: Some("/models/ggml-base.bin".to_owned()),
            timeout: Duration::from_secs(1),
        };
        let args = provider.build_args(
            Path::new("/tmp/in.wav"),
            "fr",
            Path::new("/tmp/work/transcribe_output"),
        );
        assert!(args.contains(&"-oj".to_owned()));
        assert!(args.contains(&"-m".to_owned()));
        assert!(args.contains(&"/models/ggml-base.bin".to_owned()));
        let language_flag = args.iter().position(|a| a == "-l").unwrap();
        assert_eq!(args[language_flag + 1], "fr");
    }

    #[test]
    fn binary_default_is_whisper_cli() {
        if std::env::var("PARLAMETRIC_WHISPER_BIN").is_err() {
            assert_eq!(binary(), "whisper-cli");
        }
    }

    #[test]
    fn missing_audio_file_is_rejected_before_spawning() {
        let provider = CommandTranscriptionProvider::new(None);
        let token = CancellationToken::no_deadline();
        let dir = tempfile::tempdir().unwrap();
        let err = provider
            .transcribe(
                Path::new("/nonexistent/audio_xyz.wav"),
                "fr",
                dir.path(),
                &token,
            )
            .unwrap_err();
        assert!(matches!(err, PmError::MissingArtifact(_)));
    }
}
