//! Shared value types for aligning OCR transcriptions against a phrase corpus.
//!
//! Everything here is plain data: phrases and the concordance built over them,
//! page-tagged tokens, the spans produced by matching, and the job record that
//! coordinates a long-running batch. Provenance travels as [`ContentData`], a
//! reference-counted JSON object that is only cloned when a stage writes to it.
//!
//! ```rust
//! use ritus_types::{ContentData, JobStatus, keys};
//!
//! let page = ContentData::from_json(r#"{"where_in_ms_from": "12r"}"#).unwrap();
//! let mut copy = page.clone();
//! copy.set_str(keys::WHERE_TO, "12v");
//! assert_eq!(page.get_str(keys::WHERE_TO), None);
//! assert_eq!("canceled".parse::<JobStatus>(), Ok(JobStatus::Canceled));
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known fields of a content record.
pub mod keys {
    pub const WHERE_FROM: &str = "where_in_ms_from";
    pub const WHERE_TO: &str = "where_in_ms_to";
    pub const FORMULA_TEXT: &str = "formula_text_from_ms";
    pub const FORMULA_ID: &str = "formula_id";
    pub const FORMULA_STANDARDIZED: &str = "formula_standardized";
    pub const SIMILARITY: &str = "similarity";
    pub const SEQUENCE: &str = "sequence_in_ms";
    pub const RITE_NAME: &str = "rite_name_from_ms";
    pub const RITE_ID: &str = "rite_id";
    pub const RITE_STANDARDIZED: &str = "rite_name_standarized";
}

/// Corpus-assigned identifier of a reference phrase.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhraseId(String);

impl PhraseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhraseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhraseId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A canonical reference string (formula or rite name).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Phrase {
    pub id: PhraseId,
    pub text: String,
}

/// Concordance word id, assigned in first-seen order starting at 1.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct WordId(pub u32);

/// One distinct token of the phrase corpus.
///
/// `popularity` counts phrases containing the word, not raw occurrences;
/// `occurrences` holds one phrase id per containing phrase.
#[derive(Clone, Debug, PartialEq)]
pub struct ConcordanceEntry {
    pub word_id: WordId,
    pub word: String,
    pub popularity: u32,
    pub occurrences: Vec<PhraseId>,
}

/// Page and location metadata attached to a piece of text.
///
/// Clones share the underlying object; the first write through a clone
/// detaches it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentData(Arc<Map<String, Value>>);

impl ContentData {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(Arc::new(map))
    }

    /// Parse a JSON document that must be an object.
    pub fn from_json(raw: &str) -> Result<Self, ContentDataError> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(ContentDataError::NotAnObject(kind_of(&other))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        Arc::make_mut(&mut self.0).insert(key.to_string(), value.into());
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set(key, Value::String(value.to_string()));
    }

    /// Sets `key` only when it is absent.
    pub fn set_default(&mut self, key: &str, value: &str) {
        if !self.0.contains_key(key) {
            self.set_str(key, value);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(Arc::unwrap_or_clone(self.0))
    }

    /// True when both handles point at the same shared object.
    pub fn shares_with(&self, other: &ContentData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Error)]
pub enum ContentDataError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Best concordance hit for a single token.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WordMatch {
    pub word_id: WordId,
    pub similarity: f64,
}

/// One whitespace-delimited unit of input text.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub page_name: String,
    pub original_word: String,
    /// Dense, 1-based; recomputed after merges.
    pub word_number: usize,
    pub concordance: Option<WordMatch>,
    pub content_data: ContentData,
}

impl Token {
    /// Similarity of the annotated match, 0 when unmatched.
    pub fn similarity(&self) -> f64 {
        self.concordance.map(|m| m.similarity).unwrap_or(0.0)
    }
}

/// Phrase a span was matched to.
#[derive(Clone, Debug, PartialEq)]
pub struct PhraseMatch {
    pub id: PhraseId,
    pub text: String,
}

/// A contiguous run of text, either matched to a phrase or left as residue.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultSpan {
    pub original_text: String,
    pub best_phrase: Option<PhraseMatch>,
    pub rite: Option<PhraseMatch>,
    pub similarity_percentage: f64,
    pub content_data: ContentData,
    pub check_again: bool,
}

impl ResultSpan {
    pub fn residue(text: impl Into<String>, content_data: ContentData) -> Self {
        Self {
            original_text: text.into(),
            best_phrase: None,
            rite: None,
            similarity_percentage: 0.0,
            content_data,
            check_again: true,
        }
    }

    pub fn formula(
        text: impl Into<String>,
        phrase: PhraseMatch,
        similarity: f64,
        content_data: ContentData,
    ) -> Self {
        Self {
            original_text: text.into(),
            best_phrase: Some(phrase),
            rite: None,
            similarity_percentage: similarity,
            content_data,
            check_again: false,
        }
    }

    pub fn rite(
        text: impl Into<String>,
        rite: PhraseMatch,
        similarity: f64,
        content_data: ContentData,
    ) -> Self {
        Self {
            original_text: text.into(),
            best_phrase: None,
            rite: Some(rite),
            similarity_percentage: similarity,
            content_data,
            check_again: false,
        }
    }

    /// Unmatched by both the formula and the rite passes.
    pub fn is_residue(&self) -> bool {
        self.best_phrase.is_none() && self.rite.is_none()
    }
}

/// Project the batch runs for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one job record; a restart for the same project gets a new id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Canceled => "canceled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Canceled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "canceled" | "cancelled" => Ok(JobStatus::Canceled),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(UnknownStatus(raw.to_string())),
        }
    }
}

/// The coordination record for one batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
    pub total_units: usize,
    pub processed_units: usize,
    pub similarity_threshold: f64,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(id: JobId, similarity_threshold: f64) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0.0,
            total_units: 0,
            processed_units: 0,
            similarity_threshold,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Canceled,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!("Cancelled".parse::<JobStatus>(), Ok(JobStatus::Canceled));
        assert!("paused".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn content_data_copies_on_write() {
        let original = ContentData::from_json(r#"{"where_in_ms_from": "3r", "layer": 1}"#)
            .expect("object");
        let mut copy = original.clone();
        assert!(copy.shares_with(&original));

        copy.set_str(keys::WHERE_FROM, "4v");
        assert!(!copy.shares_with(&original));
        assert_eq!(original.get_str(keys::WHERE_FROM), Some("3r"));
        assert_eq!(copy.get_str(keys::WHERE_FROM), Some("4v"));
        assert_eq!(copy.get("layer"), Some(&Value::from(1)));
    }

    #[test]
    fn content_data_rejects_non_objects() {
        assert!(matches!(
            ContentData::from_json("[1, 2]"),
            Err(ContentDataError::NotAnObject("an array"))
        ));
        assert!(matches!(
            ContentData::from_json("{not json"),
            Err(ContentDataError::Json(_))
        ));
    }

    #[test]
    fn errors_describe_the_bad_input() {
        let err = ContentData::from_json("\"page\"").unwrap_err();
        assert_eq!(err.to_string(), "expected a JSON object, got a string");
        let err = ContentData::from_json("{").unwrap_err();
        assert!(err.to_string().starts_with("invalid JSON: "));
        assert!(std::error::Error::source(&err).is_some());

        let err = "paused".parse::<JobStatus>().unwrap_err();
        assert_eq!(err, UnknownStatus("paused".into()));
        assert_eq!(err.to_string(), "unknown job status: paused");
    }

    #[test]
    fn set_default_keeps_existing_values() {
        let mut data = ContentData::from_json(r#"{"where_in_ms_to": "9r"}"#).expect("object");
        data.set_default(keys::WHERE_TO, "10v");
        data.set_default(keys::WHERE_FROM, "10v");
        assert_eq!(data.get_str(keys::WHERE_TO), Some("9r"));
        assert_eq!(data.get_str(keys::WHERE_FROM), Some("10v"));
    }

    #[test]
    fn residue_and_matches_are_distinguished() {
        let data = ContentData::default();
        let residue = ResultSpan::residue("fili dei", data.clone());
        assert!(residue.is_residue());
        assert!(residue.check_again);

        let phrase = PhraseMatch {
            id: PhraseId::new("1"),
            text: "Oremus domine".into(),
        };
        let formula = ResultSpan::formula("Oremus domine", phrase.clone(), 100.0, data.clone());
        assert!(!formula.is_residue());
        let rite = ResultSpan::rite("Ordo", phrase, 90.0, data);
        assert!(!rite.is_residue());
        assert!(!rite.check_again);
    }
}
