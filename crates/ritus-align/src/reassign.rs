//! Page-range provenance for final spans, recovered by walking the spans and
//! the refined token stream side by side.
//!
//! The walk is a tolerant word-by-word comparison, not a diff: blank tokens are
//! skipped, and one extra word on either side is stepped over. When nothing
//! lines up, the last known page bound is carried on.

use tracing::info;

use ritus_types::{ResultSpan, Token, keys};

/// Rewrite each span's content data from the token it starts at, with
/// `where_in_ms_from`/`where_in_ms_to` set to the first and last page the
/// span's words were found on.
///
/// Spans after the token stream runs out keep their content data.
pub fn reassign_provenance(mut spans: Vec<ResultSpan>, tokens: &[Token]) -> Vec<ResultSpan> {
    let mut w = 0;
    let mut reassigned = 0;

    for span in spans.iter_mut() {
        if w >= tokens.len() {
            break;
        }
        let words = span_words(&span.original_text);
        let first = &tokens[w];
        let mut data = first.content_data.clone();
        data.set_str(keys::WHERE_FROM, &first.page_name);
        data.set_str(keys::WHERE_TO, &first.page_name);

        let mut o = 0;
        while o < words.len() {
            w += 1;
            o += 1;
            if w >= tokens.len() {
                break;
            }
            while w < tokens.len() - 1 && clean(&tokens[w].original_word).is_empty() {
                w += 1;
            }
            let token = clean(&tokens[w].original_word);
            if o < words.len() && token == clean(words[o]) {
                data.set_str(keys::WHERE_TO, &tokens[w].page_name);
            } else if o + 1 < words.len() && token == clean(words[o + 1]) {
                o += 1;
            } else if o < words.len()
                && w + 1 < tokens.len()
                && clean(&tokens[w + 1].original_word) == clean(words[o])
            {
                w += 1;
            }
        }

        span.content_data = data;
        reassigned += 1;
    }

    info!("reassigned provenance for {reassigned} of {} spans", spans.len());
    spans
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn span_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !is_word_char(c))
        .filter(|w| !w.is_empty())
        .collect()
}

fn clean(word: &str) -> String {
    word.chars().filter(|c| is_word_char(*c)).collect()
}
