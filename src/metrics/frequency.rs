//! Reference-corpus word frequency lookup.
//!
//! Each supported language embeds a frequency table mapping a lowercased
//! word to its normalized corpus frequency in (0, 1], higher = more common.
//! Out-of-vocabulary words get a fixed floor value rather than 0.0, which
//! keeps every reported frequency inside the (0, 1] contract and stops a
//! single unknown token from registering as maximally rare.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::error::{PmError, PmResult};

const FR_FREQUENCY_TSV: &str = include_str!("data/fr_frequency.tsv");
const EN_FREQUENCY_TSV: &str = include_str!("data/en_frequency.tsv");

/// Frequency assigned to words absent from the reference table.
pub const OOV_FREQUENCY: f64 = 1e-6;

/// Read-only frequency table for one language.
pub struct FrequencyLexicon {
    language: &'static str,
    table: HashMap<&'static str, f64>,
}

impl fmt::Debug for FrequencyLexicon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencyLexicon")
            .field("language", &self.language)
            .field("entries", &self.table.len())
            .finish_non_exhaustive()
    }
}

fn parse_frequency_table(tsv: &'static str) -> HashMap<&'static str, f64> {
    let mut table = HashMap::new();
    for line in tsv.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split('\t');
        let (Some(word), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(frequency) = value.parse::<f64>() else {
            continue;
        };
        if frequency > 0.0 && frequency <= 1.0 {
            table.insert(word, frequency);
        }
    }
    table
}

static FR_LEXICON: Lazy<FrequencyLexicon> = Lazy::new(|| FrequencyLexicon {
    language: "fr",
    table: parse_frequency_table(FR_FREQUENCY_TSV),
});

static EN_LEXICON: Lazy<FrequencyLexicon> = Lazy::new(|| FrequencyLexicon {
    language: "en",
    table: parse_frequency_table(EN_FREQUENCY_TSV),
});

impl FrequencyLexicon {
    /// Look up the shared lexicon for `language`, failing fast when the
    /// language is unsupported or its embedded table parsed empty.
    pub fn for_language(language: &str) -> PmResult<&'static FrequencyLexicon> {
        let lexicon = match language {
            "fr" => &*FR_LEXICON,
            "en" => &*EN_LEXICON,
            other => {
                return Err(PmError::LexiconUnavailable {
                    language: other.to_owned(),
                    detail: "no frequency table embedded for this language".to_owned(),
                });
            }
        };
        if lexicon.table.is_empty() {
            return Err(PmError::LexiconUnavailable {
                language: lexicon.language.to_owned(),
                detail: "frequency table parsed empty".to_owned(),
            });
        }
        Ok(lexicon)
    }

    /// Normalized corpus frequency of `word`, case-insensitive.
    /// Always in (0, 1].
    #[must_use]
    pub fn frequency(&self, word: &str) -> f64 {
        let lowered = word.to_lowercase();
        self.table.get(lowered.as_str()).copied().unwrap_or(OOV_FREQUENCY)
    }

    /// Number of entries in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Median of a frequency sequence: mean of the two middle values for even
/// lengths, `1.0` ("maximally common, no signal") for an empty sequence.
#[must_use]
pub fn median_frequency(frequencies: &[f64]) -> f64 {
    if frequencies.is_empty() {
        return 1.0;
    }
    let mut sorted = frequencies.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
