//! Reference phrase tables and the token concordance built over them.
//!
//! A [`PhraseTable`] is an ordered `id -> text` mapping loaded from a headed CSV
//! file (`id,text`) or built in memory. Ids must be unique, texts may repeat.
//! [`Concordance`] tokenizes every phrase on whitespace and indexes each
//! distinct token with the phrases it occurs in.
//!
//! # Example
//! ```no_run
//! use ritus_corpus::{Concordance, PhraseTable};
//!
//! # fn main() -> anyhow::Result<()> {
//! let formulas = PhraseTable::load_csv("static/data/formulas.csv")?;
//! let concordance = Concordance::build(&formulas)?;
//! println!("{} phrases, {} distinct words", formulas.len(), concordance.len());
//! # Ok(()) }
//! ```
//!
//! For a runnable demo, see `cargo run -p ritus-corpus --example stats -- <formulas.csv>`.

mod concordance;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use ritus_types::{Phrase, PhraseId};

pub use concordance::Concordance;

#[derive(Debug, Error, PartialEq)]
pub enum CorpusError {
    #[error("phrase corpus is empty")]
    EmptyCorpus,
    #[error("duplicate phrase id: {0}")]
    DuplicatePhraseId(PhraseId),
}

/// Ordered, id-unique collection of reference phrases.
#[derive(Clone, Debug, Default)]
pub struct PhraseTable {
    phrases: Vec<Phrase>,
}

#[derive(Deserialize)]
struct PhraseRecord {
    id: String,
    text: String,
}

impl PhraseTable {
    /// Build from `(id, text)` pairs, keeping their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, CorpusError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut phrases = Vec::new();
        for (id, text) in pairs {
            let id = PhraseId::new(id);
            if !seen.insert(id.clone()) {
                return Err(CorpusError::DuplicatePhraseId(id));
            }
            phrases.push(Phrase {
                id,
                text: text.into(),
            });
        }
        Ok(Self { phrases })
    }

    /// Load a headed CSV with at least the columns `id` and `text`.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("phrase file not found: {}", path.display());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("open {}", path.display()))?;

        let mut pairs = Vec::new();
        for (lineno, record) in reader.deserialize::<PhraseRecord>().enumerate() {
            let record =
                record.with_context(|| format!("{}: record {}", path.display(), lineno + 1))?;
            pairs.push((record.id.trim().to_string(), record.text));
        }

        let table = Self::from_pairs(pairs).with_context(|| format!("load {}", path.display()))?;
        info!("loaded {} phrases from {}", table.len(), path.display());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn get(&self, id: &PhraseId) -> Option<&Phrase> {
        self.phrases.iter().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Phrase> + '_ {
        self.phrases.iter()
    }
}

/// Whitespace tokenization shared by the corpus and the input side.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> + '_ {
    text.split_whitespace()
}
