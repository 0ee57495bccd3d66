//! Alignment of OCR token streams against a corpus of canonical phrases.
//!
//! A batch runs these phases in order, each one a function from the previous
//! phase's output to a new value:
//!
//! 1. [`extract_tokens`] flattens content rows into page-tagged tokens.
//! 2. [`annotate_tokens`] attaches the closest concordance word to each token.
//! 3. [`refine_tokens`] merges token pairs that OCR split apart.
//! 4. [`search_by_fragment`] finds phrases in bounded text fragments.
//! 5. [`refine_until_stable`] searches the leftover residues again, pass by pass.
//! 6. [`reassign_provenance`] recovers the page range of every span.
//!
//! [`BatchJob`] drives them under a [`JobController`], which re-reads the
//! shared job record before each unit of work and stops when the job is no
//! longer running.

pub mod extract;
pub mod fragment;
pub mod job;
pub mod matcher;
pub mod pipeline;
pub mod reassign;
pub mod research;
pub mod score;
pub mod store;
pub mod vocab;

use thiserror::Error;

use ritus_corpus::CorpusError;
use ritus_types::ProjectId;

pub use extract::extract_tokens;
pub use fragment::{FRAGMENT_LEN, search_by_fragment};
pub use job::{JobController, JobRegistry, JobStore, ProgressBand};
pub use matcher::{MatchError, PhraseMatcher};
pub use pipeline::{BatchJob, BatchOptions, BatchOutcome, Corpus, CorpusSource};
pub use reassign::reassign_provenance;
pub use research::{MAX_PASSES, PhraseKind, refine_until_stable};
pub use score::{Scorer, length_adjusted_partial_ratio};
pub use store::{ContentRow, ContentStore, MemoryContentStore};
pub use vocab::{annotate_tokens, refine_tokens};

#[derive(Debug, Error)]
pub enum AlignError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("failed to load phrase corpus: {0:#}")]
    CorpusLoad(anyhow::Error),
    #[error("no phrases available for matching")]
    NoVocabulary,
    #[error("no job record for project {0}")]
    MissingJob(ProjectId),
    #[error("job canceled")]
    Canceled,
}
