//! Corpus search over bounded text fragments of the refined token stream.
//!
//! Tokens are joined with single spaces into a buffer of at most
//! `fragment_len` characters (a token that crosses the limit is kept whole).
//! Each search either splits the buffer around the best phrase or, failing
//! that, gives up its first half as residue. Whatever follows goes back into
//! the buffer, so a phrase may straddle two fills.

use tracing::{debug, info, warn};

use ritus_types::{ContentData, ResultSpan, Token, keys};

use crate::AlignError;
use crate::job::{JobController, ProgressBand};
use crate::matcher::PhraseMatcher;

/// Default fragment budget in characters.
pub const FRAGMENT_LEN: usize = 5674;

const BAND: ProgressBand = ProgressBand::new(20.0, 30.0);

/// Find phrases in the token stream and split it into matched spans and residues.
///
/// Residue texts are whitespace-trimmed; no character of the token words is
/// dropped or duplicated.
pub fn search_by_fragment(
    tokens: &[Token],
    matcher: &PhraseMatcher,
    fragment_len: usize,
    ctl: &JobController,
) -> Result<Vec<ResultSpan>, AlignError> {
    let total = tokens.len();
    let fragment_len = fragment_len.max(1);
    let mut spans: Vec<ResultSpan> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0usize;
    let mut data = ContentData::default();
    let mut w = 0;

    while w < total || !buffer.is_empty() {
        ctl.checkpoint()?;
        if let Some(token) = tokens.get(w) {
            data = token.content_data.clone();
        }
        while w < total && buffer_chars < fragment_len {
            if !buffer.is_empty() {
                buffer.push(' ');
                buffer_chars += 1;
            }
            buffer.push_str(&tokens[w].original_word);
            buffer_chars += tokens[w].original_word.chars().count();
            w += 1;
        }

        let found = match matcher.find(&buffer) {
            Ok(found) => found,
            Err(err) => {
                warn!("searching fragment {:?}: {err}", preview(&buffer));
                None
            }
        };

        let rest = match found {
            Some(found) => {
                let (before, matched, after) = split_at_chars(&buffer, found.start, found.end);
                if let Some(page) = w.checked_sub(1).map(|i| tokens[i].page_name.as_str()) {
                    data.set_default(keys::WHERE_FROM, page);
                    data.set_default(keys::WHERE_TO, page);
                }
                push_residue(&mut spans, before, &data, "");
                let matched = matched.trim();
                if matched.is_empty() {
                    push_residue(&mut spans, after, &data, "");
                    String::new()
                } else {
                    let mut span_data = data.clone();
                    span_data.set_str(keys::FORMULA_TEXT, matched);
                    spans.push(ResultSpan::formula(
                        matched,
                        found.phrase_match(),
                        found.score,
                        span_data,
                    ));
                    after.to_string()
                }
            }
            None => {
                let (head, tail) = cut_on_space(&buffer);
                debug!("no phrase in fragment {:?}", preview(head));
                push_residue(&mut spans, head, &data, "");
                tail.to_string()
            }
        };
        buffer_chars = rest.chars().count();
        buffer = rest;
        ctl.advance_with(BAND, w, total, spans.len());
    }

    for span in spans.iter_mut().filter(|s| s.is_residue()) {
        let trimmed = span.original_text.trim();
        if trimmed.len() != span.original_text.len() {
            span.original_text = trimmed.to_string();
        }
    }
    info!("fragment search produced {} spans", spans.len());
    Ok(spans)
}

/// Append `text` as residue, extending a residue already at the end of `spans`.
///
/// The extended residue keeps its own content data and is marked for another
/// look. Blank text never opens a new residue. `sep` goes between the old and
/// the new text when they come from different places.
pub fn push_residue(spans: &mut Vec<ResultSpan>, text: &str, data: &ContentData, sep: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(last) = spans.last_mut()
        && last.is_residue()
    {
        last.original_text.push_str(sep);
        last.original_text.push_str(text);
        last.check_again = true;
        return;
    }
    if text.trim().is_empty() {
        return;
    }
    spans.push(ResultSpan::residue(text, data.clone()));
}

/// Split roughly in half at the last space at or before the middle character.
///
/// The head is never empty for non-empty input, and the tail keeps the space.
pub fn cut_on_space(text: &str) -> (&str, &str) {
    let chars = text.chars().count();
    if chars == 0 {
        return ("", "");
    }
    let mid = chars / 2;
    let mid_byte = byte_offset(text, mid);
    let limit = byte_offset(text, mid + 1);
    let cut = match text[..limit].rfind(' ') {
        Some(idx) if idx > 0 => idx,
        _ if mid > 0 => mid_byte,
        _ => byte_offset(text, 1),
    };
    text.split_at(cut)
}

/// Split `text` into `[..start]`, `[start..end]`, `[end..]` by character offsets.
pub fn split_at_chars(text: &str, start: usize, end: usize) -> (&str, &str, &str) {
    let start = byte_offset(text, start);
    let end = byte_offset(text, end).max(start);
    (&text[..start], &text[start..end], &text[end..])
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

fn preview(text: &str) -> &str {
    &text[..byte_offset(text, 50)]
}
