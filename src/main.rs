use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use geocatalog::config::{Config, RepositoryKind};
use geocatalog::error::{CatalogError, Result};
use geocatalog::ingest;
use geocatalog::manager::{self, SystemProfile};
use geocatalog::model::SearchQuery;
use geocatalog::parser;
use geocatalog::repository::{self, SegmentRepository};
use geocatalog::server::{self, ApiKind};
use geocatalog::{logging, Catalog};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Geospatial metadata catalog", long_about = None)]
struct Cli {
    /// YAML configuration file (defaults to $GEOCATALOG_CONFIG)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare backend storage
    Createindex,
    /// Load JSON records into the catalog
    Index(IndexArgs),
    /// Query the catalog
    Search(SearchArgs),
    /// Fetch records by identifier
    Get {
        /// Comma-separated identifiers
        #[clap(long)]
        id: String,
    },
    /// Run the HTTP API
    Serve {
        #[clap(long)]
        port: Option<u16>,
        #[clap(long, value_enum, default_value_t = ApiKind::OpenSearch)]
        api: ApiKind,
    },
    /// Print the version
    Version,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct IndexArgs {
    #[clap(long)]
    file: Option<PathBuf>,
    #[clap(long)]
    dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[clap(long, default_value = "")]
    term: String,
    /// minx,miny,maxx,maxy
    #[clap(long)]
    bbox: Option<String>,
    /// Instant, or start,end
    #[clap(long)]
    time: Option<String>,
    /// Comma-separated collection names
    #[clap(long)]
    collections: Option<String>,
    #[clap(long, default_value = "0")]
    from: usize,
    #[clap(long)]
    size: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("geocatalog {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("geocatalog: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("geocatalog: {}", e);
        return ExitCode::FAILURE;
    }

    let profile = SystemProfile::detect();
    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        strict_durability = profile.strict_durability,
        "resource profile"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command, config, profile)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => return Config::from_env(),
    };
    config.apply_env(std::env::vars())?;
    Ok(config)
}

async fn run(command: Command, config: Config, profile: SystemProfile) -> Result<()> {
    if let Command::Createindex = command {
        Catalog::create(&config).await?;
        info!(kind = %config.repository.kind, "storage prepared");
        return Ok(());
    }

    let catalog = open_catalog(config, &profile)?;

    match command {
        Command::Index(args) => index(&catalog, args).await,
        Command::Search(args) => {
            let query = search_query(args, catalog.config().server.limit)?;
            print_json(&catalog.try_search(&query).await?)
        }
        Command::Get { id } => {
            let identifiers = parser::parse_list(&id);
            print_json(&catalog.try_get(&identifiers).await?)
        }
        Command::Serve { port, api } => {
            let port = port.unwrap_or(catalog.config().server.port);
            server::serve(catalog, api, port).await
        }
        Command::Createindex | Command::Version => Ok(()),
    }
}

/// The embedded backend is built here so the compaction thread can share it.
fn open_catalog(config: Config, profile: &SystemProfile) -> Result<Catalog> {
    if config.repository.kind != RepositoryKind::Segment {
        let repository = repository::open(&config.repository, profile.strict_durability)?;
        return Ok(Catalog::with_repository(config, repository));
    }

    let segment = Arc::new(SegmentRepository::open(
        repository::segment_path(&config.repository),
        profile.strict_durability,
    )?);
    if let Some(secs) = config.repository.compaction_interval_secs.filter(|s| *s > 0) {
        manager::start_compaction_thread(segment.clone(), Duration::from_secs(secs));
    }
    Ok(Catalog::with_repository(config, segment))
}

async fn index(catalog: &Catalog, args: IndexArgs) -> Result<()> {
    let files = match (args.file, args.dir) {
        (Some(file), _) => vec![file],
        (None, Some(dir)) => ingest::collect_files(&dir),
        (None, None) => return Err(CatalogError::caller_input("one of --file or --dir is required")),
    };

    let (mut indexed, mut failed) = (0usize, 0usize);
    for file in &files {
        let records = match ingest::load_records(file) {
            Ok(records) => records,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "skipping file");
                failed += 1;
                continue;
            }
        };
        for record in records {
            // Catalog::index logs each failure.
            match catalog.index(record).await {
                Ok(()) => indexed += 1,
                Err(_) => failed += 1,
            }
        }
    }

    info!(files = files.len(), indexed, failed, "indexing finished");
    load_outcome(indexed, failed)
}

/// A run where nothing loaded and something failed is a failed run.
fn load_outcome(indexed: usize, failed: usize) -> Result<()> {
    if failed > 0 && indexed == 0 {
        return Err(CatalogError::caller_input(format!(
            "no records indexed ({} failures)",
            failed
        )));
    }
    Ok(())
}

fn search_query(args: SearchArgs, default_limit: usize) -> Result<SearchQuery> {
    let mut query = SearchQuery::new()
        .with_term(args.term.trim())
        .with_collections(args.collections.as_deref().map(parser::parse_list).unwrap_or_default())
        .with_page(args.from, args.size.unwrap_or(default_limit));
    query.bbox = args.bbox.as_deref().map(parser::parse_bbox).transpose()?;
    query.time = args.time.as_deref().map(parser::parse_time).transpose()?;
    Ok(query)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
