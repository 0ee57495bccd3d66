use std::collections::{HashMap, HashSet};

use tracing::info;

use ritus_types::{ConcordanceEntry, PhraseId, WordId};

use crate::{CorpusError, PhraseTable, tokenize};

/// Inverted index from corpus words to the phrases containing them.
#[derive(Clone, Debug)]
pub struct Concordance {
    entries: Vec<ConcordanceEntry>,
    by_word: HashMap<String, usize>,
    phrase_tokens: HashMap<PhraseId, Vec<WordId>>,
}

impl Concordance {
    pub fn build(table: &PhraseTable) -> Result<Self, CorpusError> {
        if table.is_empty() {
            return Err(CorpusError::EmptyCorpus);
        }

        let mut entries: Vec<ConcordanceEntry> = Vec::new();
        let mut by_word: HashMap<String, usize> = HashMap::new();

        for phrase in table.iter() {
            let mut seen = HashSet::new();
            for word in tokenize(&phrase.text) {
                if !seen.insert(word) {
                    continue;
                }
                let idx = match by_word.get(word) {
                    Some(idx) => *idx,
                    None => {
                        let idx = entries.len();
                        entries.push(ConcordanceEntry {
                            word_id: WordId(idx as u32 + 1),
                            word: word.to_string(),
                            popularity: 0,
                            occurrences: Vec::new(),
                        });
                        by_word.insert(word.to_string(), idx);
                        idx
                    }
                };
                let entry = &mut entries[idx];
                entry.popularity += 1;
                entry.occurrences.push(phrase.id.clone());
            }
        }

        let phrase_tokens = table
            .iter()
            .map(|phrase| {
                let ids = tokenize(&phrase.text)
                    .filter_map(|word| by_word.get(word).map(|idx| entries[*idx].word_id))
                    .collect();
                (phrase.id.clone(), ids)
            })
            .collect();

        info!("built phrase concordance with {} entries", entries.len());
        Ok(Self {
            entries,
            by_word,
            phrase_tokens,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in word-id order.
    pub fn entries(&self) -> &[ConcordanceEntry] {
        &self.entries
    }

    pub fn entry(&self, id: WordId) -> Option<&ConcordanceEntry> {
        let idx = (id.0 as usize).checked_sub(1)?;
        self.entries.get(idx)
    }

    pub fn by_word(&self, word: &str) -> Option<&ConcordanceEntry> {
        self.by_word.get(word).map(|idx| &self.entries[*idx])
    }

    /// Vocabulary in word-id order.
    pub fn words(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.word.as_str())
    }

    /// Token ids of a phrase in text order, repeats included.
    pub fn phrase_tokens(&self, id: &PhraseId) -> Option<&[WordId]> {
        self.phrase_tokens.get(id).map(Vec::as_slice)
    }
}
