//! The deterministic text-metrics scoring engine.
//!
//! Given a transcript and an elapsed-time value, computes lemma statistics,
//! lexical-frequency statistics, and two normalized 0-100 scores (fluency,
//! vocabulary). Pure: no I/O, no hidden state, identical inputs always
//! yield identical outputs. The only shared data are the read-only lexicons
//! loaded once per process.

pub mod frequency;
pub mod tokenize;

use std::collections::HashSet;

use crate::error::{PmError, PmResult};
use crate::model::{CalibrationPreset, ScoreResult, TokenizerMode};

use self::frequency::FrequencyLexicon;
use self::tokenize::Lemmatizer;

/// Configuration for [`TextMetricsEngine`].
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub mode: TokenizerMode,
    /// ISO language code; "fr" and "en" ship embedded resources.
    pub language: String,
    /// WPM mapped to fluency 0 under the `v1` calibration.
    pub min_wpm: f64,
    /// WPM mapped to fluency 100 under the `v1` calibration.
    pub max_wpm: f64,
    pub calibration: CalibrationPreset,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            mode: TokenizerMode::Linguistic,
            language: "fr".to_owned(),
            min_wpm: 30.0,
            max_wpm: 160.0,
            calibration: CalibrationPreset::V1,
        }
    }
}

/// Stateless scoring engine over a validated configuration.
///
/// Construction resolves the language resources (lemma table, frequency
/// table) so a missing lexicon fails at startup, never per call.
pub struct TextMetricsEngine {
    config: MetricsConfig,
    lemmatizer: Option<&'static Lemmatizer>,
    lexicon: &'static FrequencyLexicon,
}

impl std::fmt::Debug for TextMetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextMetricsEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TextMetricsEngine {
    pub fn new(config: MetricsConfig) -> PmResult<Self> {
        if !config.min_wpm.is_finite()
            || !config.max_wpm.is_finite()
            || config.max_wpm <= config.min_wpm
        {
            return Err(PmError::InvalidRequest(format!(
                "calibration range must satisfy min_wpm < max_wpm (got {} .. {})",
                config.min_wpm, config.max_wpm
            )));
        }
        let lemmatizer = match config.mode {
            TokenizerMode::Linguistic => Some(Lemmatizer::for_language(&config.language)?),
            TokenizerMode::Simple => None,
        };
        let lexicon = FrequencyLexicon::for_language(&config.language)?;
        Ok(Self {
            config,
            lemmatizer,
            lexicon,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Compute the full metric bundle for one transcript.
    ///
    /// `duration_minutes` must be strictly positive and finite; anything
    /// else is rejected with `InvalidDuration` rather than silently divided.
    /// An empty transcript is not an error and produces the all-zero result.
    pub fn compute_metrics(&self, text: &str, duration_minutes: f64) -> PmResult<ScoreResult> {
        if !duration_minutes.is_finite() || duration_minutes <= 0.0 {
            return Err(PmError::InvalidDuration {
                minutes: duration_minutes,
            });
        }

        let lemmas = match self.config.mode {
            TokenizerMode::Linguistic => {
                // Resolved at construction for linguistic mode.
                let lemmatizer = self.lemmatizer.ok_or_else(|| PmError::LexiconUnavailable {
                    language: self.config.language.clone(),
                    detail: "lemmatizer not initialized".to_owned(),
                })?;
                tokenize::linguistic_lemmas(text, lemmatizer)
            }
            TokenizerMode::Simple => tokenize::simple_lemmas(text),
        };

        let total_lemmas = lemmas.len();
        let unique_lemmas = lemmas.iter().collect::<HashSet<_>>().len();

        // Per-token, not per-distinct-lemma: repeated words weigh on the
        // median exactly as often as they were spoken.
        let frequencies: Vec<f64> = lemmas
            .iter()
            .map(|lemma| self.lexicon.frequency(lemma))
            .collect();
        let median_frequency = frequency::median_frequency(&frequencies);

        let wpm = total_lemmas as f64 / duration_minutes;
        let fluency_score = self.fluency_score(wpm);
        let vocabulary_score = vocabulary_score(unique_lemmas, total_lemmas, median_frequency);

        Ok(ScoreResult {
            total_lemmas,
            unique_lemmas,
            median_frequency,
            fluency_score,
            vocabulary_score,
            wpm,
        })
    }

    fn fluency_score(&self, wpm: f64) -> u8 {
        match self.config.calibration {
            CalibrationPreset::V1 => {
                let span = self.config.max_wpm - self.config.min_wpm;
                let scaled = ((wpm - self.config.min_wpm) / span) * 100.0;
                scaled.clamp(0.0, 100.0).round() as u8
            }
            // Historical variant: raw WPM capped at 100.
            CalibrationPreset::V2 => wpm.round().min(100.0).max(0.0) as u8,
        }
    }
}

/// Diversity/rarity blend: equal-weight average of the unique-lemma ratio
/// and `1 - median_frequency`, scaled to 0-100.
fn vocabulary_score(unique_lemmas: usize, total_lemmas: usize, median_frequency: f64) -> u8 {
    let unique_ratio = if total_lemmas > 0 {
        unique_lemmas as f64 / total_lemmas as f64
    } else {
        0.0
    };
    let rarity_component = 1.0 - median_frequency;
    let score = (unique_ratio + rarity_component) / 2.0 * 100.0;
    score.clamp(0.0, 100.0).round() as u8
}

/// One-shot convenience over a default-configured engine.
pub fn compute_metrics(
    text: &str,
    duration_minutes: f64,
    config: MetricsConfig,
) -> PmResult<ScoreResult> {
    TextMetricsEngine::new(config)?.compute_metrics(text, duration_minutes)
}
