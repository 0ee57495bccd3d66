use serde_json::Value;
use tracing::{debug, info, warn};

use ritus_corpus::tokenize;
use ritus_types::{ContentData, Token, keys};

use crate::AlignError;
use crate::job::{JobController, ProgressBand};
use crate::store::ContentRow;

const BAND: ProgressBand = ProgressBand::new(5.0, 10.0);

/// Flatten content rows into one token stream, numbering tokens from 1.
///
/// A row whose data is not a JSON object, or whose text field is not a string,
/// is skipped with a warning. Every token shares its row's content data.
pub fn extract_tokens(rows: &[ContentRow], ctl: &JobController) -> Result<Vec<Token>, AlignError> {
    let mut tokens = Vec::new();
    ctl.set_total(rows.len());

    for (i, row) in rows.iter().enumerate() {
        ctl.checkpoint()?;
        match row_tokens(row) {
            Ok(row_tokens) => {
                debug!("row {}: {} tokens", row.id, row_tokens.len());
                for (page_name, word, data) in row_tokens {
                    tokens.push(Token {
                        page_name,
                        original_word: word,
                        word_number: tokens.len() + 1,
                        concordance: None,
                        content_data: data,
                    });
                }
            }
            Err(reason) => warn!("skipping content row {}: {reason}", row.id),
        }
        ctl.advance_with(BAND, i + 1, rows.len(), i + 1);
    }

    info!("extracted {} tokens from {} rows", tokens.len(), rows.len());
    Ok(tokens)
}

fn row_tokens(row: &ContentRow) -> Result<Vec<(String, String, ContentData)>, String> {
    let data = ContentData::from_json(&row.data).map_err(|err| err.to_string())?;
    let text = match data.get(keys::FORMULA_TEXT) {
        None => return Ok(Vec::new()),
        Some(Value::String(text)) => text.clone(),
        Some(other) => return Err(format!("text field is not a string: {other}")),
    };
    let page_name = data
        .get_str(keys::WHERE_FROM)
        .map(str::to_string)
        .unwrap_or_else(|| row.id.to_string());

    Ok(tokenize(&text)
        .map(|word| (page_name.clone(), word.to_string(), data.clone()))
        .collect())
}
