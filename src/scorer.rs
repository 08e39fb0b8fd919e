//! LLM-backed skill evaluation seam.
//!
//! Skill prompts are free text with a `{text}` placeholder for the
//! transcript. Scorer output is free-form; a numeric grade is recovered
//! with the `score: N` convention, tolerating `=`, `-`, and case noise.
//! Evaluation quality is the scorer's problem, not ours: an output with
//! no recoverable score yields `score: None` plus the raw feedback.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PmError, PmResult};
use crate::model::{SkillEvaluation, SkillSpec};
use crate::orchestrator::CancellationToken;
use crate::process::{command_exists, run_command_cancellable};

const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(120);

static SCORE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)score\s*[:=\-]?\s*(\d{1,3})").expect("score pattern compiles")
});

/// Substitute the transcript into a prompt template's `{text}` placeholder.
/// Templates without the placeholder get the transcript appended instead of
/// silently dropping it.
#[must_use]
pub fn render_prompt(template: &str, transcript: &str) -> String {
    if template.contains("{text}") {
        template.replace("{text}", transcript)
    } else {
        format!("{template}\n\n{transcript}")
    }
}

/// Recover a 0-100 grade from free-form scorer output. The first `score N`
/// match wins; values above 100 are capped.
#[must_use]
pub fn extract_score(output: &str) -> Option<u8> {
    let captures = SCORE_PATTERN.captures(output)?;
    let value: u16 = captures.get(1)?.as_str().parse().ok()?;
    Some(value.min(100) as u8)
}

pub trait SkillScorer: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn evaluate(
        &self,
        skill: &SkillSpec,
        transcript: &str,
        token: &CancellationToken,
    ) -> PmResult<SkillEvaluation>;
}

/// Shells out to an external command, passing the rendered prompt as the
/// final argument and reading the evaluation from stdout.
pub struct CommandSkillScorer {
    binary: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl CommandSkillScorer {
    #[must_use]
    pub fn new(binary: String, base_args: Vec<String>) -> Self {
        Self {
            binary,
            base_args,
            timeout: DEFAULT_SCORER_TIMEOUT,
        }
    }

    /// Scorer binary from `PARLAMETRIC_SCORER_BIN`, if configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let binary = std::env::var("PARLAMETRIC_SCORER_BIN").ok()?;
        Some(Self::new(binary, Vec::new()))
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SkillScorer for CommandSkillScorer {
    fn name(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn evaluate(
        &self,
        skill: &SkillSpec,
        transcript: &str,
        token: &CancellationToken,
    ) -> PmResult<SkillEvaluation> {
        if !self.is_available() {
            return Err(PmError::ProviderUnavailable(format!(
                "skill scorer command not found: {}",
                self.binary
            )));
        }

        let prompt = render_prompt(&skill.prompt_template, transcript);
        let mut args = self.base_args.clone();
        args.push(prompt);

        let output =
            run_command_cancellable(&self.binary, &args, None, token, Some(self.timeout))?;
        let feedback = String::from_utf8_lossy(&output.stdout).trim().to_owned();

        Ok(SkillEvaluation {
            skill: skill.name.clone(),
            score: extract_score(&feedback),
            feedback,
        })
    }
}
