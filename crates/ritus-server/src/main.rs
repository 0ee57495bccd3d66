use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use ritus_align::{BatchOptions, CorpusSource, FRAGMENT_LEN, MAX_PASSES};
use ritus_server::{AppState, router};

#[derive(Parser, Debug, Clone)]
#[command(name = "ritus-server")]
#[command(about = "Runs phrase alignment batches for manuscript transcription projects")]
struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
    /// Formula phrase table (`id,text` CSV).
    #[arg(long, env = "FORMULAS_CSV", default_value = "static/data/formulas.csv")]
    formulas_csv: PathBuf,
    /// Rite name table, read only when rite passes are enabled.
    #[arg(long, env = "RITE_NAMES_CSV", default_value = "static/data/rite_names.csv")]
    rite_names_csv: PathBuf,
    /// Rite refinement passes after the formula passes; 0 disables them.
    #[arg(long, env = "RITE_PASSES", default_value_t = 0,
          value_parser = clap::value_parser!(u64).range(0..=5))]
    rite_passes: u64,
    #[arg(long, env = "MAX_PASSES", default_value_t = MAX_PASSES)]
    max_passes: usize,
    #[arg(long, env = "FRAGMENT_LEN", default_value_t = FRAGMENT_LEN)]
    fragment_len: usize,
}

impl Config {
    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_passes: self.max_passes,
            fragment_len: self.fragment_len,
            rite_passes: self.rite_passes as usize,
            ..BatchOptions::default()
        }
    }

    fn corpus(&self) -> CorpusSource {
        CorpusSource::Files {
            formulas: self.formulas_csv.clone(),
            rites: (self.rite_passes > 0).then(|| self.rite_names_csv.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::parse();
    info!("binding to {}:{}", config.host, config.port);
    info!("using formulas at {}", config.formulas_csv.display());
    if !config.formulas_csv.exists() {
        warn!(
            "formula table {} does not exist; batches will fail until it does",
            config.formulas_csv.display()
        );
    }
    if config.rite_passes > 0 {
        info!(
            "rite alignment enabled ({} passes) using {}",
            config.rite_passes,
            config.rite_names_csv.display()
        );
    }
    let state = AppState::new(config.corpus(), config.batch_options());
    let app = router(state).layer(TraceLayer::new_for_http());
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let max_level = env_filter
        .max_level_hint()
        .and_then(|hint| hint.into_level())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_max_level(max_level)
        .init();
}
