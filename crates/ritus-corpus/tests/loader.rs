use std::io::Write;

use ritus_corpus::{Concordance, PhraseTable};
use ritus_types::PhraseId;
use tempfile::NamedTempFile;

fn csv_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write csv");
    file
}

#[test]
fn loads_quoted_fields_and_extra_columns() {
    let file = csv_file(
        "id,text,source\n\
         1,\"Oremus, dilectissimi\",sacramentary\n\
         2,Per omnia secula seculorum,\n",
    );
    let table = PhraseTable::load_csv(file.path()).expect("load phrases");
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.get(&PhraseId::new("1")).map(|p| p.text.as_str()),
        Some("Oremus, dilectissimi")
    );

    let conc = Concordance::build(&table).expect("concordance");
    assert!(conc.by_word("Oremus,").is_some());
    assert_eq!(conc.len(), 6);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PhraseTable::load_csv(dir.path().join("formulas.csv")).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn missing_text_column_is_an_error() {
    let file = csv_file("id,name\n1,Ordo\n");
    assert!(PhraseTable::load_csv(file.path()).is_err());
}

#[test]
fn duplicate_ids_fail_the_load() {
    let file = csv_file("id,text\n7,Kyrie\n7,Christe\n");
    let err = PhraseTable::load_csv(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("duplicate phrase id: 7"));
}

#[test]
fn header_only_file_loads_empty_and_concordance_refuses_it() {
    let file = csv_file("id,text\n");
    let table = PhraseTable::load_csv(file.path()).expect("empty table");
    assert!(table.is_empty());
    assert!(Concordance::build(&table).is_err());
}
