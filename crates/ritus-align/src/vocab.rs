//! Token-level matching against the concordance vocabulary.

use tracing::{debug, info, warn};

use ritus_corpus::Concordance;
use ritus_types::{Token, WordMatch};

use crate::AlignError;
use crate::job::{JobController, ProgressBand};
use crate::matcher::{MatchError, extract_best};
use crate::score::ratio_scorer;

/// Cutoff a merged token pair has to exceed.
pub const MERGE_CUTOFF: f64 = 80.0;

const ANNOTATE_BAND: ProgressBand = ProgressBand::new(10.0, 15.0);
const REFINE_BAND: ProgressBand = ProgressBand::new(15.0, 20.0);

struct Vocabulary<'a> {
    concordance: &'a Concordance,
    words: Vec<&'a str>,
}

impl<'a> Vocabulary<'a> {
    fn new(concordance: &'a Concordance) -> Result<Self, AlignError> {
        if concordance.is_empty() {
            return Err(AlignError::NoVocabulary);
        }
        Ok(Self {
            concordance,
            words: concordance.words().collect(),
        })
    }

    fn lookup(&self, word: &str, cutoff: f64) -> Result<Option<WordMatch>, MatchError> {
        let best = extract_best(word, self.words.iter().copied(), ratio_scorer, cutoff)?;
        Ok(best.map(|best| WordMatch {
            word_id: self.concordance.entries()[best.index].word_id,
            similarity: best.score,
        }))
    }
}

/// Attach the best vocabulary word at or above `threshold` to every token.
///
/// A scoring failure leaves that one token unmatched.
pub fn annotate_tokens(
    mut tokens: Vec<Token>,
    concordance: &Concordance,
    threshold: f64,
    ctl: &JobController,
) -> Result<Vec<Token>, AlignError> {
    let vocabulary = Vocabulary::new(concordance)?;
    let total = tokens.len();

    for (i, token) in tokens.iter_mut().enumerate() {
        ctl.checkpoint()?;
        token.concordance = match vocabulary.lookup(&token.original_word, threshold) {
            Ok(found) => found,
            Err(err) => {
                warn!("annotating token {:?}: {err}", token.original_word);
                None
            }
        };
        ctl.advance(ANNOTATE_BAND, i + 1, total);
    }

    let matched = tokens.iter().filter(|t| t.concordance.is_some()).count();
    info!("annotated {total} tokens, {matched} matched the vocabulary");
    Ok(tokens)
}

/// Merge adjacent tokens whose concatenation matches the vocabulary better.
///
/// Greedy and left to right: a merged pair is never reconsidered. Output
/// tokens are renumbered from 1.
pub fn refine_tokens(
    tokens: &[Token],
    concordance: &Concordance,
    ctl: &JobController,
) -> Result<Vec<Token>, AlignError> {
    let vocabulary = Vocabulary::new(concordance)?;
    let total = tokens.len();
    let mut refined: Vec<Token> = Vec::with_capacity(total);
    let mut i = 0;

    while i < total {
        ctl.checkpoint()?;
        let token = &tokens[i];

        if let Some(next) = tokens.get(i + 1)
            && let Some(merged) = merge_pair(&vocabulary, token, next)
        {
            debug!(
                "merged {:?} + {:?} -> {:?} ({:.1})",
                token.original_word,
                next.original_word,
                merged.original_word,
                merged.similarity()
            );
            refined.push(Token {
                word_number: refined.len() + 1,
                ..merged
            });
            i += 2;
        } else {
            refined.push(Token {
                word_number: refined.len() + 1,
                ..token.clone()
            });
            i += 1;
        }
        ctl.advance(REFINE_BAND, i, total);
    }

    info!("refined {total} tokens into {}", refined.len());
    Ok(refined)
}

fn merge_pair(vocabulary: &Vocabulary, token: &Token, next: &Token) -> Option<Token> {
    let combined = format!("{}{}", token.original_word, next.original_word);
    let found = match vocabulary.lookup(&combined, MERGE_CUTOFF) {
        Ok(found) => found?,
        Err(err) => {
            warn!("refining token pair {combined:?}: {err}");
            return None;
        }
    };
    let beats_parts = found.similarity > token.similarity().max(next.similarity());
    if !beats_parts || found.similarity <= MERGE_CUTOFF {
        return None;
    }
    Some(Token {
        page_name: token.page_name.clone(),
        original_word: combined,
        word_number: token.word_number,
        concordance: Some(found),
        content_data: token.content_data.clone(),
    })
}
