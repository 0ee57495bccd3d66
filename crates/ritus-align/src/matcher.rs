use thiserror::Error;

use ritus_types::{Phrase, PhraseMatch};

use crate::score::{Scorer, length_adjusted_partial_ratio, partial_ratio_alignment};

/// Failure scoring a single token or fragment. Callers downgrade it to "no match".
#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("scorer returned a non-finite score for {0:?}")]
    NonFiniteScore(String),
    #[error("no alignment between fragment and phrase {0}")]
    MissingAlignment(String),
    #[error("alignment {start}..{end} exceeds fragment of {len} characters")]
    AlignmentOutOfBounds { start: usize, end: usize, len: usize },
}

/// Index and score of the best choice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Best {
    pub index: usize,
    pub score: f64,
}

/// Score `query` against every choice and keep the first maximum at or above `cutoff`.
pub fn extract_best<'a, I>(
    query: &str,
    choices: I,
    scorer: Scorer,
    cutoff: f64,
) -> Result<Option<Best>, MatchError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<Best> = None;
    for (index, choice) in choices.into_iter().enumerate() {
        let score = scorer(query, choice, cutoff);
        if !score.is_finite() {
            return Err(MatchError::NonFiniteScore(choice.to_string()));
        }
        if score >= cutoff && best.is_none_or(|b| score > b.score) {
            best = Some(Best { index, score });
        }
    }
    Ok(best)
}

/// A phrase located inside a piece of text.
#[derive(Clone, Debug, PartialEq)]
pub struct Found<'a> {
    pub phrase: &'a Phrase,
    pub score: f64,
    /// Character offsets of the aligned span in the searched text.
    pub start: usize,
    pub end: usize,
}

impl Found<'_> {
    pub fn phrase_match(&self) -> PhraseMatch {
        PhraseMatch {
            id: self.phrase.id.clone(),
            text: self.phrase.text.clone(),
        }
    }
}

/// Corpus-level search: best phrase for a text plus where it sits in the text.
#[derive(Clone, Copy)]
pub struct PhraseMatcher<'a> {
    phrases: &'a [Phrase],
    scorer: Scorer,
    threshold: f64,
}

impl<'a> PhraseMatcher<'a> {
    pub fn new(phrases: &'a [Phrase], threshold: f64) -> Self {
        Self::with_scorer(phrases, threshold, length_adjusted_partial_ratio)
    }

    pub fn with_scorer(phrases: &'a [Phrase], threshold: f64, scorer: Scorer) -> Self {
        Self {
            phrases,
            scorer,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn find(&self, text: &str) -> Result<Option<Found<'a>>, MatchError> {
        let choices = self.phrases.iter().map(|p| p.text.as_str());
        let Some(best) = extract_best(text, choices, self.scorer, self.threshold)? else {
            return Ok(None);
        };
        let phrase = &self.phrases[best.index];

        let alignment = partial_ratio_alignment(text, &phrase.text, 0.0)
            .ok_or_else(|| MatchError::MissingAlignment(phrase.id.to_string()))?;
        let len = text.chars().count();
        if alignment.src_start > alignment.src_end || alignment.src_end > len {
            return Err(MatchError::AlignmentOutOfBounds {
                start: alignment.src_start,
                end: alignment.src_end,
                len,
            });
        }

        Ok(Some(Found {
            phrase,
            score: best.score,
            start: alignment.src_start,
            end: alignment.src_end,
        }))
    }
}
