//! Tokenization and lemmatization for the metrics engine.
//!
//! Two strategies, selected by [`TokenizerMode`]:
//!
//! - **Linguistic** (canonical): language-aware splitting (French elision
//!   prefixes, punctuation stripping), alphabetic-only filter, lowercasing,
//!   then dictionary lemmatization via a per-language exception table plus
//!   ordered suffix rules.
//! - **Simple** (fallback): whitespace split, keep whitespace-delimited
//!   tokens whose characters are all alphabetic, surface form is its own
//!   lemma. No normalization.
//!
//! Language resources are embedded at compile time and parsed once into
//! process-wide, read-only statics. Concurrent callers share them without
//! synchronization.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::error::{PmError, PmResult};

const FR_LEMMA_TSV: &str = include_str!("data/fr_lemmas.tsv");
const EN_LEMMA_TSV: &str = include_str!("data/en_lemmas.tsv");

/// Suffix rewrite rule: (suffix, replacement, minimum stem length).
///
/// The stem is what remains after removing the suffix; rules with too short
/// a stem are skipped so that e.g. French "les" is not rewritten by the
/// plural rule (it is handled by the exception table anyway).
type SuffixRule = (&'static str, &'static str, usize);

/// French suffix rules, tried in order after the exception table.
/// First match wins.
const FR_SUFFIX_RULES: &[SuffixRule] = &[
    ("issons", "ir", 2),
    ("issez", "ir", 2),
    ("issent", "ir", 2),
    ("issais", "ir", 2),
    ("issait", "ir", 2),
    ("eaux", "eau", 2),
    ("aux", "al", 2),
    ("ées", "er", 2),
    ("és", "er", 2),
    ("ée", "er", 2),
    ("é", "er", 2),
    ("aient", "er", 2),
    ("ait", "er", 3),
    ("ais", "er", 3),
    ("ons", "er", 3),
    ("ez", "er", 3),
    ("s", "", 3),
];

/// English suffix rules, tried in order after the exception table.
const EN_SUFFIX_RULES: &[SuffixRule] = &[
    ("sses", "ss", 2),
    ("ies", "y", 2),
    ("ied", "y", 2),
    ("ing", "", 3),
    ("ed", "", 3),
    ("es", "", 3),
    ("s", "", 3),
];

/// French elision prefixes dropped before the alphabetic check, so that
/// "l'école" contributes "école" rather than being discarded.
const FR_ELISION_PREFIXES: &[&str] = &[
    "jusqu'", "lorsqu'", "puisqu'", "qu'", "l'", "d'", "j'", "n'", "m'", "t'", "s'", "c'",
];

/// Read-only lemmatization resources for one language.
pub struct Lemmatizer {
    language: &'static str,
    exceptions: HashMap<&'static str, &'static str>,
    rules: &'static [SuffixRule],
    elisions: &'static [&'static str],
}

impl fmt::Debug for Lemmatizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lemmatizer")
            .field("language", &self.language)
            .field("exceptions", &self.exceptions.len())
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

fn parse_lemma_table(tsv: &'static str) -> HashMap<&'static str, &'static str> {
    let mut table = HashMap::new();
    for line in tsv.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split('\t');
        if let (Some(surface), Some(lemma)) = (parts.next(), parts.next()) {
            if parts.next().is_none() && !surface.is_empty() && !lemma.is_empty() {
                table.insert(surface, lemma);
            }
        }
    }
    table
}

static FR_LEMMATIZER: Lazy<Lemmatizer> = Lazy::new(|| Lemmatizer {
    language: "fr",
    exceptions: parse_lemma_table(FR_LEMMA_TSV),
    rules: FR_SUFFIX_RULES,
    elisions: FR_ELISION_PREFIXES,
});

static EN_LEMMATIZER: Lazy<Lemmatizer> = Lazy::new(|| Lemmatizer {
    language: "en",
    exceptions: parse_lemma_table(EN_LEMMA_TSV),
    rules: EN_SUFFIX_RULES,
    elisions: &[],
});

impl Lemmatizer {
    /// Look up the shared lemmatizer for `language`.
    ///
    /// Fails fast with `LexiconUnavailable` for unsupported languages or if
    /// the embedded table parsed empty, so a broken resource is caught at
    /// engine construction rather than per call.
    pub fn for_language(language: &str) -> PmResult<&'static Lemmatizer> {
        let lemmatizer = match language {
            "fr" => &*FR_LEMMATIZER,
            "en" => &*EN_LEMMATIZER,
            other => {
                return Err(PmError::LexiconUnavailable {
                    language: other.to_owned(),
                    detail: "no lemma table embedded for this language".to_owned(),
                });
            }
        };
        if lemmatizer.exceptions.is_empty() {
            return Err(PmError::LexiconUnavailable {
                language: lemmatizer.language.to_owned(),
                detail: "lemma exception table parsed empty".to_owned(),
            });
        }
        Ok(lemmatizer)
    }

    /// Reduce one lowercased surface form to its lemma.
    #[must_use]
    pub fn lemma_of(&self, surface: &str) -> String {
        if let Some(lemma) = self.exceptions.get(surface) {
            return (*lemma).to_owned();
        }
        for (suffix, replacement, min_stem) in self.rules {
            if let Some(stem) = surface.strip_suffix(suffix) {
                if stem.chars().count() < *min_stem {
                    continue;
                }
                // Bare plural strip must not mangle -ss/-us/-is words.
                if *suffix == "s"
                    && (stem.ends_with('s') || stem.ends_with('u') || stem.ends_with('i'))
                {
                    continue;
                }
                return format!("{stem}{replacement}");
            }
        }
        surface.to_owned()
    }

    fn split_elisions<'a>(&self, word: &'a str) -> &'a str {
        for prefix in self.elisions {
            if word.len() <= prefix.len() {
                continue;
            }
            match word.get(..prefix.len()) {
                Some(head) if head.eq_ignore_ascii_case(prefix) => {
                    return &word[prefix.len()..];
                }
                _ => {}
            }
        }
        word
    }
}

/// Extract lemmas from `text` in linguistic mode.
///
/// Order of operations per whitespace-delimited chunk: drop an elision
/// prefix (French), trim surrounding non-alphabetic characters, require the
/// remainder to be entirely alphabetic, lowercase, lemmatize. Words with an
/// interior apostrophe left after elision handling (e.g. "aujourd'hui")
/// fail the alphabetic check and are discarded.
pub fn linguistic_lemmas(text: &str, lemmatizer: &Lemmatizer) -> Vec<String> {
    let mut lemmas = Vec::new();
    for raw in text.split_whitespace() {
        // Normalize typographic apostrophes so elision handling sees one form.
        let normalized = raw.replace('\u{2019}', "'");
        let chunk = lemmatizer.split_elisions(&normalized);
        let trimmed = chunk.trim_matches(|c: char| !c.is_alphabetic());
        if trimmed.is_empty() || !trimmed.chars().all(char::is_alphabetic) {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        lemmas.push(lemmatizer.lemma_of(&lowered));
    }
    lemmas
}

/// Extract "lemmas" from `text` in simple mode: whitespace split, keep only
/// fully alphabetic tokens, surface form is the lemma.
#[must_use]
pub fn simple_lemmas(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|token| !token.is_empty() && token.chars().all(char::is_alphabetic))
        .map(str::to_owned)
        .collect()
}
