use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use ritus_corpus::{Concordance, PhraseTable};

fn main() -> Result<()> {
    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: cargo run -p ritus-corpus --example stats -- <phrases.csv>")?;

    let table = PhraseTable::load_csv(&path)
        .with_context(|| format!("loading phrases from {}", path.display()))?;
    let concordance = Concordance::build(&table)?;

    let token_count: usize = table
        .iter()
        .filter_map(|p| concordance.phrase_tokens(&p.id))
        .map(<[_]>::len)
        .sum();

    println!("Phrases      : {}", table.len());
    println!("Tokens       : {}", token_count);
    println!("Vocabulary   : {}", concordance.len());

    let mut popular: Vec<_> = concordance.entries().iter().collect();
    popular.sort_by(|a, b| b.popularity.cmp(&a.popularity).then(a.word_id.cmp(&b.word_id)));
    println!("Most popular words:");
    for entry in popular.iter().take(10) {
        println!("  {:>6}  {}", entry.popularity, entry.word);
    }

    Ok(())
}
