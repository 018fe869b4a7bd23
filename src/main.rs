use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiersearch::index::{self, IndexConfig, SearchModel, Searcher};
use tiersearch::query::{Expander, Query, SynonymTable};
use tiersearch::utils::{Analyzer, StandardAnalyzer};
use tracing::Level;

#[derive(Parser)]
#[command(name = "tiersearch")]
#[command(about = "Tiered full-text search engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file (missing fields take defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a full index from a JSON-lines document file
    Index {
        /// Input file, one JSON document per line
        input: PathBuf,

        /// Index base path (files are written as <base>.idx, <base>.kv, <base>.sum)
        #[arg(short, long)]
        out: PathBuf,

        /// Documents per spill file
        #[arg(long)]
        spill: Option<usize>,

        /// Hide progress output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Merge the index at <src> into the index at <dst>
    Merge { src: PathBuf, dst: PathBuf },
    /// Search an index
    Search {
        /// Index base path
        base: PathBuf,

        /// Query text
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,

        /// Scoring model
        #[arg(short, long, value_enum, default_value_t = ModelArg::Bm25)]
        model: ModelArg,

        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// JSON synonym table used to expand BM25 queries
        #[arg(long)]
        synonyms: Option<PathBuf>,
    },
    /// Show index statistics
    Stats {
        /// Index base path
        base: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Boolean,
    Vsm,
    Bm25,
}

impl From<ModelArg> for SearchModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Boolean => SearchModel::Boolean,
            ModelArg::Vsm => SearchModel::VectorSpace,
            ModelArg::Bm25 => SearchModel::Bm25,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => IndexConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => IndexConfig::default(),
    };

    match cli.command {
        Commands::Index {
            input,
            out,
            spill,
            quiet,
        } => {
            if let Some(spill) = spill {
                config.build.spill_threshold = spill;
            }
            config.validate()?;
            let report = index::build::build_from_jsonl(&input, &out, &config, quiet)?;
            println!(
                "Indexed {} documents ({} skipped), {} terms, {} spill files",
                report.documents, report.skipped, report.terms, report.spill_files
            );
        }
        Commands::Merge { src, dst } => {
            let terms = index::merge_index(&src, &dst, &config)?;
            println!("Merged {} terms from {} into {}", terms, src.display(), dst.display());
        }
        Commands::Search {
            base,
            query,
            model,
            top_k,
            synonyms,
        } => {
            if let Some(top_k) = top_k {
                config.retrieval.top_k = top_k;
            }
            run_search(&base, config, &query.join(" "), model.into(), synonyms.as_deref())?;
        }
        Commands::Stats { base } => {
            index::stats::show_stats(&base, &config)?;
        }
    }

    Ok(())
}

fn run_search(
    base: &Path,
    config: IndexConfig,
    text: &str,
    model: SearchModel,
    synonyms: Option<&Path>,
) -> Result<()> {
    let expander: Option<Arc<dyn Expander>> = match synonyms {
        Some(path) => Some(Arc::new(
            SynonymTable::load(path).with_context(|| format!("Failed to load synonyms {}", path.display()))?,
        )),
        None => None,
    };
    let analyzer: Arc<dyn Analyzer> = Arc::new(StandardAnalyzer);
    let searcher = Searcher::open_with(base, config, analyzer.clone(), expander)
        .with_context(|| format!("Failed to open index {}", base.display()))?;

    let results = match model {
        SearchModel::Bm25 => searcher.search(text)?,
        _ => searcher.retrieval(&Query::must(analyzer.analyze(text)), model)?,
    };
    searcher.close()?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, posting) in results.iter().enumerate() {
        println!("{:3}. doc {:<10} score {:.4}", rank + 1, posting.doc_id, posting.score);
    }
    Ok(())
}
