use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tempfile::tempdir;

use ritus_align::{
    AlignError, BatchJob, BatchOptions, BatchOutcome, ContentRow, ContentStore, Corpus,
    CorpusSource, JobRegistry, JobStore, MemoryContentStore,
};
use ritus_corpus::PhraseTable;
use ritus_types::{Job, JobId, JobStatus, ProjectId};

const PROJECT: ProjectId = ProjectId(42);

fn corpus(formulas: &[(&str, &str)], rites: Option<&[(&str, &str)]>) -> CorpusSource {
    let formulas = PhraseTable::from_pairs(formulas.iter().copied()).unwrap();
    let rites = rites.map(|r| PhraseTable::from_pairs(r.iter().copied()).unwrap());
    CorpusSource::Loaded(Arc::new(Corpus::new(formulas, rites).unwrap()))
}

fn content(rows: &[Value]) -> MemoryContentStore {
    let store = MemoryContentStore::new();
    store.replace(PROJECT, rows.to_vec());
    store
}

fn records(store: &MemoryContentStore) -> Vec<Value> {
    store
        .rows(PROJECT)
        .iter()
        .map(|row| serde_json::from_str(&row.data).unwrap())
        .collect()
}

#[test]
fn phrase_and_residue_are_written_back() {
    let dir = tempdir().unwrap();
    let formulas = dir.path().join("formulas.csv");
    fs::write(&formulas, "id,text\n1,Oremus domine\n").unwrap();
    let source = CorpusSource::Files {
        formulas,
        rites: None,
    };

    let jobs = JobRegistry::new();
    let store = content(&[json!({
        "where_in_ms_from": "1r",
        "formula_text_from_ms": "Oremus domine fili dei",
        "hand": "B"
    })]);
    let job = jobs.start(PROJECT, 75.0);

    let outcome = BatchJob::new(&jobs, &store, PROJECT, job.id).run(&source).unwrap();
    assert_eq!(outcome, BatchOutcome::Completed { records: 2 });

    let out = records(&store);
    assert_eq!(out[0]["formula_text_from_ms"], "Oremus domine");
    assert_eq!(out[0]["formula_id"], "1");
    assert_eq!(out[0]["similarity"], 100.0);
    assert_eq!(out[0]["sequence_in_ms"], 1);
    assert_eq!(out[0]["where_in_ms_from"], "1r");
    assert_eq!(out[0]["where_in_ms_to"], "1r");
    assert_eq!(out[0]["hand"], "B");
    assert_eq!(out[1]["formula_text_from_ms"], "fili dei");
    assert_eq!(out[1]["formula_id"], "");
    assert_eq!(out[1]["sequence_in_ms"], 2);

    let record = jobs.snapshot(PROJECT).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100.0);
    assert_eq!(record.total_units, 1);
    assert_eq!(record.processed_units, 2);
}

#[test]
fn split_word_is_rejoined_before_search() {
    let jobs = JobRegistry::new();
    let store = content(&[
        json!({"where_in_ms_from": "1r", "formula_text_from_ms": "Oremus dom"}),
        json!({"where_in_ms_from": "1v", "formula_text_from_ms": "ine fili dei"}),
    ]);
    let job = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], None);

    BatchJob::new(&jobs, &store, PROJECT, job.id).run(&source).unwrap();

    let out = records(&store);
    assert_eq!(out[0]["formula_text_from_ms"], "Oremus domine");
    assert_eq!(out[0]["formula_id"], "1");
    assert_eq!(out[0]["where_in_ms_from"], "1r");
    // The merged token keeps the page of its first half.
    assert_eq!(out[0]["where_in_ms_to"], "1r");
    assert_eq!(out[1]["formula_text_from_ms"], "fili dei");
    assert_eq!(out[1]["where_in_ms_from"], "1v");
}

#[test]
fn empty_project_completes_without_records() {
    let jobs = JobRegistry::new();
    let store = MemoryContentStore::new();
    let job = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], None);

    let outcome = BatchJob::new(&jobs, &store, PROJECT, job.id).run(&source).unwrap();
    assert_eq!(outcome, BatchOutcome::Completed { records: 0 });

    let record = jobs.snapshot(PROJECT).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100.0);
    assert!(store.rows(PROJECT).is_empty());
}

/// Cancels the job once the pipeline has read the record `after` times.
struct CancelAfter {
    inner: JobRegistry,
    reads: AtomicUsize,
    after: usize,
}

impl JobStore for CancelAfter {
    fn snapshot(&self, project: ProjectId) -> Option<Job> {
        if self.reads.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.inner.cancel(project);
        }
        self.inner.snapshot(project)
    }

    fn update(&self, project: ProjectId, job: JobId, apply: &mut dyn FnMut(&mut Job)) -> bool {
        self.inner.update(project, job, apply)
    }
}

#[test]
fn cancellation_mid_run_keeps_status_and_content() {
    let original = json!({"where_in_ms_from": "1r", "formula_text_from_ms": "Oremus domine fili dei"});
    let source = corpus(&[("1", "Oremus domine")], None);

    for after in [3, 6, 10, 15] {
        let jobs = CancelAfter {
            inner: JobRegistry::new(),
            reads: AtomicUsize::new(0),
            after,
        };
        let store = content(std::slice::from_ref(&original));
        let job = jobs.inner.start(PROJECT, 75.0);

        let outcome = BatchJob::new(&jobs, &store, PROJECT, job.id).run(&source).unwrap();
        assert_eq!(outcome, BatchOutcome::Canceled, "cancel after {after} reads");

        let record = jobs.inner.snapshot(PROJECT).unwrap();
        assert_eq!(record.status, JobStatus::Canceled);
        assert_eq!(record.error_message, None);
        assert!(record.progress < 100.0);
        assert_eq!(records(&store), vec![original.clone()]);
    }
}

#[test]
fn replaced_job_stops_and_newer_one_owns_the_record() {
    let jobs = JobRegistry::new();
    let store = content(&[json!({"formula_text_from_ms": "Oremus domine"})]);
    let stale = jobs.start(PROJECT, 75.0);
    let current = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], None);

    let outcome = BatchJob::new(&jobs, &store, PROJECT, stale.id).run(&source).unwrap();
    assert_eq!(outcome, BatchOutcome::Canceled);
    let record = jobs.snapshot(PROJECT).unwrap();
    assert_eq!(record.id, current.id);
    assert_eq!(record.status, JobStatus::Running);
}

#[test]
fn missing_corpus_fails_the_job() {
    let dir = tempdir().unwrap();
    let jobs = JobRegistry::new();
    let store = content(&[json!({"formula_text_from_ms": "Oremus"})]);
    let job = jobs.start(PROJECT, 75.0);
    let source = CorpusSource::Files {
        formulas: dir.path().join("absent.csv"),
        rites: None,
    };

    let err = BatchJob::new(&jobs, &store, PROJECT, job.id)
        .run(&source)
        .unwrap_err();
    assert!(matches!(err, AlignError::CorpusLoad(_)));

    let record = jobs.snapshot(PROJECT).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.unwrap().contains("not found"));
    assert_eq!(store.rows(PROJECT).len(), 1);
}

#[test]
fn empty_corpus_fails_the_job() {
    let dir = tempdir().unwrap();
    let formulas = dir.path().join("formulas.csv");
    fs::write(&formulas, "id,text\n").unwrap();
    let jobs = JobRegistry::new();
    let store = content(&[json!({"formula_text_from_ms": "Oremus"})]);
    let job = jobs.start(PROJECT, 75.0);
    let source = CorpusSource::Files {
        formulas,
        rites: None,
    };

    let err = BatchJob::new(&jobs, &store, PROJECT, job.id)
        .run(&source)
        .unwrap_err();
    assert_eq!(err.to_string(), "phrase corpus is empty");
    let record = jobs.snapshot(PROJECT).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("phrase corpus is empty"));
}

#[test]
fn optional_rite_phase_tags_rite_names() {
    let jobs = JobRegistry::new();
    let store = content(&[json!({
        "where_in_ms_from": "5r",
        "formula_text_from_ms": "Ordo missae Oremus domine"
    })]);
    let job = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], Some(&[("r1", "Ordo missae")]));
    let options = BatchOptions {
        rite_passes: 2,
        ..BatchOptions::default()
    };

    let outcome = BatchJob::new(&jobs, &store, PROJECT, job.id)
        .with_options(options)
        .run(&source)
        .unwrap();
    assert_eq!(outcome, BatchOutcome::Completed { records: 2 });

    let out = records(&store);
    assert_eq!(out[0]["rite_id"], "r1");
    assert_eq!(out[0]["rite_name_from_ms"], "Ordo missae");
    assert_eq!(out[0]["formula_text_from_ms"], "");
    assert_eq!(out[1]["formula_id"], "1");
    assert_eq!(out[1]["rite_id"], "");
}

#[test]
fn rite_phase_is_off_by_default() {
    let jobs = JobRegistry::new();
    let store = content(&[json!({"formula_text_from_ms": "Ordo missae Oremus domine"})]);
    let job = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], Some(&[("r1", "Ordo missae")]));

    BatchJob::new(&jobs, &store, PROJECT, job.id).run(&source).unwrap();
    let out = records(&store);
    assert_eq!(out[0]["formula_text_from_ms"], "Ordo missae");
    assert_eq!(out[0]["rite_id"], "");
}

#[test]
fn malformed_rows_are_skipped() {
    let jobs = JobRegistry::new();
    let store = MemoryContentStore::new();
    store.insert_raw(
        PROJECT,
        vec![
            ContentRow::new(1, "{broken"),
            ContentRow::new(2, r#"{"formula_text_from_ms": "Oremus domine"}"#),
        ],
    );
    let job = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], None);

    let outcome = BatchJob::new(&jobs, &store, PROJECT, job.id).run(&source).unwrap();
    assert_eq!(outcome, BatchOutcome::Completed { records: 1 });
    assert_eq!(records(&store)[0]["where_in_ms_from"], "2");
}

/// A store whose reads blow up, standing in for a bug deep inside a batch.
struct BrokenStore;

impl ContentStore for BrokenStore {
    fn rows(&self, _project: ProjectId) -> Vec<ContentRow> {
        panic!("content backend went away");
    }

    fn replace(&self, _project: ProjectId, _records: Vec<Value>) {}
}

#[test]
fn panic_inside_batch_marks_job_failed() {
    let jobs = JobRegistry::new();
    let job = jobs.start(PROJECT, 75.0);
    let source = corpus(&[("1", "Oremus domine")], None);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        BatchJob::new(&jobs, &BrokenStore, PROJECT, job.id).run(&source)
    }));
    assert!(result.is_err(), "the panic keeps unwinding to the caller");

    let record = jobs.snapshot(PROJECT).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(
        record
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("content backend went away")
    );
    assert!(!jobs.is_active(PROJECT));
}
