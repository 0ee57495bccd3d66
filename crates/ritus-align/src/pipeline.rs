use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use ritus_corpus::{Concordance, PhraseTable};
use ritus_types::{JobId, ProjectId, ResultSpan, keys};

use crate::AlignError;
use crate::extract::extract_tokens;
use crate::fragment::{FRAGMENT_LEN, search_by_fragment};
use crate::job::{JobController, JobStore, ProgressBand};
use crate::matcher::PhraseMatcher;
use crate::reassign::reassign_provenance;
use crate::research::{MAX_PASSES, MAX_RITE_PASSES, PhraseKind, reflag_residues, refine_until_stable};
use crate::store::ContentStore;
use crate::vocab::{annotate_tokens, refine_tokens};

const FORMULA_BAND: ProgressBand = ProgressBand::new(30.0, 70.0);
const RITE_BAND: ProgressBand = ProgressBand::new(70.0, 90.0);
const OUTPUT_BAND: ProgressBand = ProgressBand::new(90.0, 100.0);

/// Tuning knobs for one batch. The similarity threshold is read from the job record.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOptions {
    /// Cap on formula refinement passes.
    pub max_passes: usize,
    /// Character budget of a search fragment.
    pub fragment_len: usize,
    /// Rite refinement passes; 0 disables the rite phase.
    pub rite_passes: usize,
    /// Units between progress writes within a phase.
    pub progress_stride: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_passes: MAX_PASSES,
            fragment_len: FRAGMENT_LEN,
            rite_passes: 0,
            progress_stride: 1,
        }
    }
}

/// Formula phrases with their concordance, and optionally rite names.
#[derive(Clone, Debug)]
pub struct Corpus {
    pub formulas: PhraseTable,
    pub concordance: Concordance,
    pub rites: Option<PhraseTable>,
}

impl Corpus {
    pub fn new(formulas: PhraseTable, rites: Option<PhraseTable>) -> Result<Self, AlignError> {
        let concordance = Concordance::build(&formulas)?;
        Ok(Self {
            formulas,
            concordance,
            rites,
        })
    }
}

/// Where a batch gets its phrases from.
#[derive(Clone, Debug)]
pub enum CorpusSource {
    /// CSV tables read when the batch starts.
    Files {
        formulas: PathBuf,
        rites: Option<PathBuf>,
    },
    Loaded(Arc<Corpus>),
}

impl CorpusSource {
    fn load(&self, ctl: &JobController) -> Result<Arc<Corpus>, AlignError> {
        match self {
            CorpusSource::Files { formulas, rites } => {
                let formulas = PhraseTable::load_csv(formulas).map_err(AlignError::CorpusLoad)?;
                let concordance = Concordance::build(&formulas)?;
                ctl.set_progress(2.5);
                ctl.checkpoint()?;

                let rites = rites
                    .as_ref()
                    .map(PhraseTable::load_csv)
                    .transpose()
                    .map_err(AlignError::CorpusLoad)?;
                ctl.set_progress(5.0);
                Ok(Arc::new(Corpus {
                    formulas,
                    concordance,
                    rites,
                }))
            }
            CorpusSource::Loaded(corpus) => {
                ctl.set_progress(5.0);
                Ok(Arc::clone(corpus))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchOutcome {
    /// Output written and the job marked completed.
    Completed { records: usize },
    /// The job stopped running before the output was written.
    Canceled,
}

/// One run of the whole pipeline for a project.
pub struct BatchJob<'a> {
    jobs: &'a dyn JobStore,
    content: &'a dyn ContentStore,
    project: ProjectId,
    job: JobId,
    options: BatchOptions,
}

impl<'a> BatchJob<'a> {
    pub fn new(
        jobs: &'a dyn JobStore,
        content: &'a dyn ContentStore,
        project: ProjectId,
        job: JobId,
    ) -> Self {
        Self {
            jobs,
            content,
            project,
            job,
            options: BatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Run to completion, cancellation or failure.
    ///
    /// Cancellation is not an error and leaves both the job status and the
    /// project's content as the canceller left them. Any other error marks the
    /// job failed and is returned. A panic inside the pipeline also marks the
    /// job failed before it resumes unwinding.
    pub fn run(&self, source: &CorpusSource) -> Result<BatchOutcome, AlignError> {
        let ctl = JobController::new(self.jobs, self.project, self.job)
            .with_stride(self.options.progress_stride);
        if !ctl.is_running() {
            info!("job {} for project {} is not running", self.job, self.project);
            return Ok(BatchOutcome::Canceled);
        }

        info!("starting batch {} for project {}", self.job, self.project);
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.execute(&ctl, source))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("batch {} for project {} panicked: {message}", self.job, self.project);
                ctl.fail(&format!("internal error: {message}"));
                panic::resume_unwind(payload);
            }
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(AlignError::Canceled) => {
                info!("batch {} for project {} canceled", self.job, self.project);
                Ok(BatchOutcome::Canceled)
            }
            Err(err) => {
                error!("batch {} for project {} failed: {err}", self.job, self.project);
                ctl.fail(&err.to_string());
                Err(err)
            }
        }
    }

    fn execute(&self, ctl: &JobController, source: &CorpusSource) -> Result<BatchOutcome, AlignError> {
        let threshold = ctl.similarity_threshold()?;
        let corpus = source.load(ctl)?;

        let rows = self.content.rows(self.project);
        if rows.is_empty() {
            warn!("no content rows for project {}", self.project);
            return Ok(self.finish_without_output(ctl));
        }
        let tokens = extract_tokens(&rows, ctl)?;
        if tokens.is_empty() {
            warn!("no text tokens for project {}", self.project);
            return Ok(self.finish_without_output(ctl));
        }

        let tokens = annotate_tokens(tokens, &corpus.concordance, threshold, ctl)?;
        let tokens = refine_tokens(&tokens, &corpus.concordance, ctl)?;

        let formulas = PhraseMatcher::new(corpus.formulas.phrases(), threshold);
        let spans = search_by_fragment(&tokens, &formulas, self.options.fragment_len, ctl)?;
        let (mut spans, _) = refine_until_stable(
            spans,
            &formulas,
            PhraseKind::Formula,
            self.options.max_passes,
            FORMULA_BAND,
            ctl,
        )?;
        ctl.checkpoint()?;
        reflag_residues(&mut spans);

        if self.options.rite_passes > 0 {
            match &corpus.rites {
                Some(rites) => {
                    let rites = PhraseMatcher::new(rites.phrases(), threshold);
                    (spans, _) = refine_until_stable(
                        spans,
                        &rites,
                        PhraseKind::Rite,
                        self.options.rite_passes.min(MAX_RITE_PASSES),
                        RITE_BAND,
                        ctl,
                    )?;
                }
                None => warn!("rite passes requested but no rite table loaded"),
            }
        }

        let spans = reassign_provenance(spans, &tokens);
        ctl.set_progress(90.0);

        let records = self.output_records(&spans, ctl)?;
        let count = records.len();
        if ctl.complete_with(|| self.content.replace(self.project, records)) {
            info!("batch {} for project {} wrote {count} records", self.job, self.project);
            Ok(BatchOutcome::Completed { records: count })
        } else {
            Ok(BatchOutcome::Canceled)
        }
    }

    fn finish_without_output(&self, ctl: &JobController) -> BatchOutcome {
        if ctl.complete() {
            BatchOutcome::Completed { records: 0 }
        } else {
            BatchOutcome::Canceled
        }
    }

    fn output_records(
        &self,
        spans: &[ResultSpan],
        ctl: &JobController,
    ) -> Result<Vec<Value>, AlignError> {
        let total = spans.len();
        let mut records = Vec::with_capacity(total);
        for (i, span) in spans.iter().enumerate() {
            ctl.checkpoint()?;
            records.push(output_record(span, i + 1));
            ctl.advance_with(OUTPUT_BAND, i + 1, total, i + 1);
        }
        Ok(records)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// The content record stored for a final span.
pub fn output_record(span: &ResultSpan, sequence: usize) -> Value {
    let mut data = span.content_data.clone();
    let (formula_text, rite_text) = match span.rite {
        Some(_) => ("", span.original_text.as_str()),
        None => (span.original_text.as_str(), ""),
    };
    let formula = span.best_phrase.as_ref();
    let rite = span.rite.as_ref();

    data.set_str(keys::FORMULA_TEXT, formula_text);
    data.set_str(keys::FORMULA_ID, formula.map_or("", |p| p.id.as_str()));
    data.set_str(keys::FORMULA_STANDARDIZED, formula.map_or("", |p| p.text.as_str()));
    data.set(keys::SIMILARITY, span.similarity_percentage);
    data.set_str(keys::RITE_NAME, rite_text);
    data.set_str(keys::RITE_ID, rite.map_or("", |p| p.id.as_str()));
    data.set_str(keys::RITE_STANDARDIZED, rite.map_or("", |p| p.text.as_str()));
    data.set(keys::SEQUENCE, sequence as u64);
    data.set_default(keys::WHERE_FROM, "");
    data.set_default(keys::WHERE_TO, "");
    data.into_value()
}
