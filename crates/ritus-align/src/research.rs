//! Repeated phrase search over residues until the span list settles.

use tracing::{debug, info, warn};

use ritus_types::{PhraseMatch, ResultSpan, keys};

use crate::AlignError;
use crate::fragment::{push_residue, split_at_chars};
use crate::job::{JobController, ProgressBand};
use crate::matcher::PhraseMatcher;

/// Default cap on formula passes.
pub const MAX_PASSES: usize = 13;
/// Upper bound for the optional rite loop.
pub const MAX_RITE_PASSES: usize = 5;

/// What a match found by a pass is recorded as.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhraseKind {
    Formula,
    Rite,
}

impl PhraseKind {
    fn span(self, text: &str, phrase: PhraseMatch, score: f64, base: &ResultSpan) -> ResultSpan {
        let mut data = base.content_data.clone();
        data.set(keys::SIMILARITY, score);
        match self {
            PhraseKind::Formula => {
                data.set_str(keys::FORMULA_TEXT, text);
                ResultSpan::formula(text, phrase, score, data)
            }
            PhraseKind::Rite => {
                data.set_str(keys::RITE_NAME, text);
                ResultSpan::rite(text, phrase, score, data)
            }
        }
    }
}

/// One traversal of `spans`: every residue flagged for another look is
/// searched again and split around its best phrase.
///
/// Matched spans and residues not flagged pass through unchanged. A residue
/// without a match comes back unflagged with a zero score.
pub fn research_pass(
    spans: &[ResultSpan],
    matcher: &PhraseMatcher,
    kind: PhraseKind,
    band: ProgressBand,
    ctl: &JobController,
) -> Result<Vec<ResultSpan>, AlignError> {
    let total = spans.len();
    let mut out: Vec<ResultSpan> = Vec::with_capacity(total);

    for (i, span) in spans.iter().enumerate() {
        if !span.is_residue() {
            out.push(span.clone());
            continue;
        }
        if !span.check_again {
            out.push(ResultSpan {
                similarity_percentage: 0.0,
                ..span.clone()
            });
            continue;
        }

        ctl.checkpoint()?;
        let text = span.original_text.as_str();
        let found = match matcher.find(text) {
            Ok(found) => found,
            Err(err) => {
                warn!("searching residue {text:?}: {err}");
                None
            }
        };

        match found {
            Some(found) => {
                let (before, matched, after) = split_at_chars(text, found.start, found.end);
                push_residue(&mut out, before.trim(), &span.content_data, " ");
                let matched = matched.trim();
                if !matched.is_empty() {
                    out.push(kind.span(matched, found.phrase_match(), found.score, span));
                }
                push_residue(&mut out, after.trim(), &span.content_data, " ");
            }
            None => {
                debug!("no phrase in residue {text:?}");
                out.push(ResultSpan {
                    similarity_percentage: 0.0,
                    check_again: false,
                    ..span.clone()
                });
            }
        }
        ctl.advance_with(band, i + 1, total, out.len());
    }
    Ok(out)
}

/// Run [`research_pass`] until a pass leaves the span count unchanged or
/// `max_passes` passes have run. Returns the spans and the number of passes.
///
/// `band` is shared out between the passes with [`ProgressBand::pass_slot`].
pub fn refine_until_stable(
    mut spans: Vec<ResultSpan>,
    matcher: &PhraseMatcher,
    kind: PhraseKind,
    max_passes: usize,
    band: ProgressBand,
    ctl: &JobController,
) -> Result<(Vec<ResultSpan>, usize), AlignError> {
    let mut passes = 0;
    while passes < max_passes {
        ctl.checkpoint()?;
        let next = research_pass(&spans, matcher, kind, band.pass_slot(passes, max_passes), ctl)?;
        passes += 1;
        let delta = next.len() as isize - spans.len() as isize;
        info!(
            "{kind:?} pass {passes}/{max_passes}: {} spans, delta {delta}",
            next.len()
        );
        spans = next;
        if delta == 0 {
            break;
        }
    }
    Ok((spans, passes))
}

/// Flag every residue for another look.
pub fn reflag_residues(spans: &mut [ResultSpan]) {
    for span in spans.iter_mut().filter(|s| s.is_residue()) {
        span.check_again = true;
    }
}
