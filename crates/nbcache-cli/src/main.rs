mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nbcache::{
    default_cache_root, CacheError, IngestOptions, NbRef, NotebookCache, ProjectRecord,
    DEFAULT_MERGE_NB_METADATA,
};
use nbcache_executor::{get_driver, get_executor, list_executors, Executor, RunOptions};
use nbcache_notebook::ReadRecipe;
use output::{
    format_millis, print_cache_list_header, print_cache_record_line, print_json,
    print_project_list_header, print_project_record_line, project_status,
};
use serde_json::json;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "jcache",
    version,
    about = "Notebook execution cache: project registry, content-addressed cache, executors"
)]
struct Cli {
    /// Cache root (defaults to $JUPYTERCACHE, then <cwd>/.jupyter_cache)
    #[arg(short = 'p', long, global = true)]
    cache_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Work with the project: cache root, settings, batch execution
    Project(ProjectArgs),
    /// Work with notebooks in the project registry
    Notebook(NotebookArgs),
    /// Work with cached (executed) notebooks
    Cache(CacheArgs),
}

#[derive(Args)]
struct ProjectArgs {
    #[command(subcommand)]
    command: ProjectCommand,
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Initialize the cache root
    Init,
    /// Print the version of the cache
    Version,
    /// Clear the project cache completely
    Clear {
        /// Skip the safety check
        #[arg(short, long)]
        force: bool,
    },
    /// Get or set the maximum number of notebooks stored in the cache
    CacheLimit {
        limit: Option<i64>,
    },
    /// Execute all outdated notebooks in the project
    Execute(ExecuteArgs),
}

#[derive(Args)]
struct NotebookArgs {
    #[command(subcommand)]
    command: NotebookCommand,
}

#[derive(Subcommand)]
enum NotebookCommand {
    /// Add notebook file(s) to the project
    Add {
        paths: Vec<PathBuf>,
        /// Reader used to load the notebook
        #[arg(long, default_value = "ipynb")]
        reader: String,
        /// File(s) required to run the notebook(s); repeatable
        #[arg(long = "asset")]
        assets: Vec<String>,
    },
    /// Remove notebook(s) from the project, by ID or URI
    Remove { refs: Vec<String> },
    /// List notebooks in the project
    List {
        /// Emit JSON suitable for CI
        #[arg(long)]
        json: bool,
    },
    /// Show details of a notebook in the project, by ID or URI
    Info {
        nb: String,
        /// Emit JSON suitable for CI
        #[arg(long)]
        json: bool,
    },
    /// Merge cached outputs into a notebook file
    Merge {
        path: PathBuf,
        /// Write the merged notebook here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Execute selected notebooks in the project, by ID or URI
    Execute {
        refs: Vec<String>,
        #[command(flatten)]
        exec: ExecuteArgs,
    },
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List cached notebooks
    List {
        /// Emit JSON suitable for CI
        #[arg(long)]
        json: bool,
    },
    /// Show details of a cached notebook
    Info {
        pk: i64,
        /// Emit JSON suitable for CI
        #[arg(long)]
        json: bool,
    },
    /// Cache already-executed notebook file(s)
    Add {
        paths: Vec<PathBuf>,
        /// Skip the execution-count validity check
        #[arg(long)]
        no_validate: bool,
        /// Overwrite an existing cached notebook with the same fingerprint
        #[arg(long)]
        overwrite: bool,
    },
    /// Remove cached notebook(s)
    Remove { pks: Vec<i64> },
    /// Print a cached notebook
    Show { pk: i64 },
    /// Diff a notebook file against a cached one
    Diff { pk: i64, path: PathBuf },
    /// Print an artifact of a cached notebook
    CatArtifact { pk: i64, path: PathBuf },
}

#[derive(Args)]
struct ExecuteArgs {
    /// Executor to run with
    #[arg(long, default_value = "inplace-serial")]
    executor: String,
    /// Cell-execution driver to run with
    #[arg(long, default_value = "client")]
    driver: String,
    /// Per-cell timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Continue execution when a cell raises
    #[arg(long)]
    allow_errors: bool,
    /// Execute even notebooks that are already cached
    #[arg(long)]
    force: bool,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = match cli.cache_path {
        Some(path) => path,
        None => default_cache_root().context("failed to resolve the default cache root")?,
    };
    let cache = NotebookCache::new(root);

    match cli.command {
        Command::Project(args) => run_project(cache, args.command),
        Command::Notebook(args) => run_notebook(cache, args.command),
        Command::Cache(args) => run_cache(cache, args.command),
    }
}

fn run_project(mut cache: NotebookCache, command: ProjectCommand) -> Result<i32> {
    match command {
        ProjectCommand::Init => {
            // Any settings access initializes the root and schema.
            let limit = cache.cache_limit()?;
            println!("Cache root: {}", cache.root().display());
            println!("Cache limit: {limit}");
            Ok(0)
        }
        ProjectCommand::Version => match cache.version() {
            Some(version) => {
                println!("{version}");
                Ok(0)
            }
            None => {
                eprintln!("No cache found at {}", cache.root().display());
                Ok(1)
            }
        },
        ProjectCommand::Clear { force } => {
            if !cache.root().exists() {
                eprintln!("Cache does not exist: {}", cache.root().display());
                return Ok(1);
            }
            if !force {
                eprintln!(
                    "Refusing to clear {} without --force",
                    cache.root().display()
                );
                return Ok(1);
            }
            cache.clear()?;
            println!("Cache cleared: {}", cache.root().display());
            Ok(0)
        }
        ProjectCommand::CacheLimit { limit } => match limit {
            None => {
                println!("Current cache limit: {}", cache.cache_limit()?);
                Ok(0)
            }
            Some(limit) => {
                cache.set_cache_limit(limit)?;
                println!("Cache limit changed to {limit}");
                Ok(0)
            }
        },
        ProjectCommand::Execute(exec) => run_execute(cache, &exec, Vec::new()),
    }
}

fn run_notebook(cache: NotebookCache, command: NotebookCommand) -> Result<i32> {
    match command {
        NotebookCommand::Add {
            paths,
            reader,
            assets,
        } => {
            let recipe = ReadRecipe::new(reader);
            for path in &paths {
                let record = cache.add_notebook(path, &recipe, &assets)?;
                println!("Added [{}]: {}", record.pk, record.uri);
            }
            Ok(0)
        }
        NotebookCommand::Remove { refs } => {
            for raw in &refs {
                match parse_ref(raw) {
                    ParsedRef::Pk(pk) => cache.remove_notebook(NbRef::Pk(pk))?,
                    ParsedRef::Uri(uri) => cache.remove_notebook(NbRef::Uri(&uri))?,
                }
                println!("Removed: {raw}");
            }
            Ok(0)
        }
        NotebookCommand::List { json } => {
            let records = cache.project_records(None, None)?;
            if json {
                print_json(&records)?;
            } else {
                print_project_list_header();
                for record in &records {
                    print_project_record_line(&cache, record);
                }
            }
            Ok(0)
        }
        NotebookCommand::Info { nb, json } => {
            let record = project_record_for(&cache, &nb)?;
            if json {
                let cached = cache.cached_for_notebook(NbRef::Pk(record.pk)).ok().flatten();
                print_json(&json!({
                    "record": record,
                    "cached_pk": cached.map(|c| c.pk),
                }))?;
            } else {
                println!("ID: {}", record.pk);
                println!("URI: {}", record.uri);
                println!("Reader: {}", record.reader_name().unwrap_or("-"));
                println!("Added: {}", format_millis(record.created));
                println!("Status: {}", project_status(&cache, &record));
                if !record.assets.is_empty() {
                    println!("Assets:");
                    for asset in &record.assets {
                        println!("  - {asset}");
                    }
                }
                if let Some(traceback) = &record.traceback {
                    println!("Traceback:");
                    println!("{traceback}");
                }
            }
            Ok(0)
        }
        NotebookCommand::Merge { path, output } => {
            let (pk, merged) = cache.merge_file(&path, Some(DEFAULT_MERGE_NB_METADATA), None)?;
            let text = merged.to_json_pretty()?;
            match output {
                Some(output) => {
                    std::fs::write(&output, text)?;
                    println!("Merged outputs of cache record [{pk}] into {}", output.display());
                }
                None => println!("{text}"),
            }
            Ok(0)
        }
        NotebookCommand::Execute { refs, exec } => run_execute(cache, &exec, refs),
    }
}

fn run_cache(cache: NotebookCache, command: CacheCommand) -> Result<i32> {
    match command {
        CacheCommand::List { json } => {
            let records = cache.cache_records()?;
            if json {
                print_json(&records)?;
            } else {
                print_cache_list_header();
                for record in &records {
                    print_cache_record_line(record);
                }
            }
            Ok(0)
        }
        CacheCommand::Info { pk, json } => {
            let record = cache.cache_record(pk)?;
            if json {
                print_json(&record)?;
            } else {
                println!("ID: {}", record.pk);
                println!("Origin URI: {}", record.uri);
                println!("Fingerprint: {}", record.fingerprint);
                println!("Created: {}", format_millis(record.created));
                println!("Accessed: {}", format_millis(record.accessed));
                if !record.description.is_empty() {
                    println!("Description: {}", record.description);
                }
                println!("Data: {}", record.data);
                let artifact_dir = cache.artifact_dir(pk)?;
                let artifacts = nbcache::ArtifactBundle::from_dir(artifact_dir);
                if !artifacts.is_empty() {
                    println!("Artifacts:");
                    for rel in artifacts.relative_paths() {
                        println!("  - {}", rel.display());
                    }
                }
            }
            Ok(0)
        }
        CacheCommand::Add {
            paths,
            no_validate,
            overwrite,
        } => {
            let mut failed = false;
            for path in &paths {
                let options = IngestOptions {
                    check_validity: !no_validate,
                    overwrite,
                    ..IngestOptions::default()
                };
                match cache.ingest_file(path, None, Vec::new(), json!({}), options) {
                    Ok(record) => println!("Cached [{}]: {}", record.pk, path.display()),
                    Err(err) => {
                        eprintln!("Failed to cache {}: {err:#}", path.display());
                        failed = true;
                    }
                }
            }
            Ok(i32::from(failed))
        }
        CacheCommand::Remove { pks } => {
            let mut failed = false;
            for pk in pks {
                match cache.evict(pk) {
                    Ok(()) => println!("Removed: [{pk}]"),
                    Err(err) => {
                        eprintln!("Failed to remove [{pk}]: {err:#}");
                        failed = true;
                    }
                }
            }
            Ok(i32::from(failed))
        }
        CacheCommand::Show { pk } => {
            let bundle = cache.retrieve(pk)?;
            println!("{}", bundle.nb.to_json_pretty()?);
            Ok(0)
        }
        CacheCommand::Diff { pk, path } => {
            let diff = cache.diff_file(pk, &path)?;
            print!("{}", diff.to_text());
            Ok(0)
        }
        CacheCommand::CatArtifact { pk, path } => {
            if path
                .components()
                .any(|component| !matches!(component, Component::Normal(_)))
            {
                eprintln!("Artifact path must be relative: {}", path.display());
                return Ok(1);
            }
            let artifact = cache.artifact_dir(pk)?.join(&path);
            let bytes = std::fs::read(&artifact)
                .with_context(|| format!("no artifact {} in cache record [{pk}]", path.display()))?;
            std::io::stdout().write_all(&bytes)?;
            Ok(0)
        }
    }
}

fn run_execute(cache: NotebookCache, exec: &ExecuteArgs, refs: Vec<String>) -> Result<i32> {
    let Some(spec) = get_executor(&exec.executor) else {
        eprintln!(
            "Executor not found: {} (available: {})",
            exec.executor,
            list_executors().join(", ")
        );
        return Ok(1);
    };
    let Some(driver) = get_driver(&exec.driver) else {
        eprintln!(
            "No cell-execution driver registered as {:?}; embedding applications \
             register drivers with nbcache_executor::register_driver",
            exec.driver
        );
        return Ok(1);
    };

    let (filter_uris, filter_pks) = split_filters(&refs);
    let options = RunOptions {
        filter_uris,
        filter_pks,
        timeout: Some(Duration::from_secs(exec.timeout)),
        allow_errors: exec.allow_errors,
        force: exec.force,
    };
    let result = Executor::new(cache, driver, spec).run(&options)?;
    if exec.json {
        print_json(&result)?;
    } else {
        println!("Finished! Successfully executed notebooks have been cached.");
        println!("succeeded: {}", result.succeeded.len());
        for uri in &result.succeeded {
            println!("  - {uri}");
        }
        println!("excepted: {}", result.excepted.len());
        for uri in &result.excepted {
            println!("  - {uri}");
        }
        println!("errored: {}", result.errored.len());
        for uri in &result.errored {
            println!("  - {uri}");
        }
    }
    Ok(0)
}

enum ParsedRef {
    Pk(i64),
    Uri(String),
}

/// A notebook argument is a primary key when it parses as an integer,
/// otherwise a path, absolutized to match registered URIs.
fn parse_ref(raw: &str) -> ParsedRef {
    if let Ok(pk) = raw.parse::<i64>() {
        return ParsedRef::Pk(pk);
    }
    ParsedRef::Uri(absolutize(Path::new(raw)))
}

fn absolutize(path: &Path) -> String {
    if path.is_absolute() {
        path.display().to_string()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string()
    }
}

fn project_record_for(cache: &NotebookCache, raw: &str) -> Result<ProjectRecord, CacheError> {
    match parse_ref(raw) {
        ParsedRef::Pk(pk) => cache.project_record(NbRef::Pk(pk)),
        ParsedRef::Uri(uri) => cache.project_record(NbRef::Uri(&uri)),
    }
}

fn split_filters(refs: &[String]) -> (Option<Vec<String>>, Option<Vec<i64>>) {
    if refs.is_empty() {
        return (None, None);
    }
    let mut uris = Vec::new();
    let mut pks = Vec::new();
    for raw in refs {
        match parse_ref(raw) {
            ParsedRef::Pk(pk) => pks.push(pk),
            ParsedRef::Uri(uri) => uris.push(uri),
        }
    }
    (
        (!uris.is_empty()).then_some(uris),
        (!pks.is_empty()).then_some(pks),
    )
}
