use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use virotaxa::app::{App, BuildSource, GenomeFetchOptions};
use virotaxa::cache::{CacheRegistry, MaterializeMode};
use virotaxa::catalog::BuildParameters;
use virotaxa::config::{ConfigLoader, FamilyList, ResolvedConfig, resolve_families};
use virotaxa::domain::{CatalogMode, HashPrefix, PrimateHomologMode};
use virotaxa::download::{DownloadedSource, SourceClient, VhdbHttpClient};
use virotaxa::error::VirotaxaError;
use virotaxa::genome::NcbiEfetchClient;
use virotaxa::output::{ConsoleOutput, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "virotaxa")]
#[command(about = "Reproducible viral taxa catalogs from the Virus-Host Database")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Source cache directory (default: ~/.virotaxa/cache/vhdb).
    #[arg(long, global = true)]
    cache_dir: Option<Utf8PathBuf>,

    /// Project config file (default: ./virotaxa.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the latest Virus-Host Database table")]
    Download(DownloadArgs),
    #[command(about = "Summarize a Virus-Host Database table")]
    Info(InfoArgs),
    #[command(about = "List viral families among host-filtered records")]
    Families(FamiliesArgs),
    #[command(about = "Manage the content-addressed source cache")]
    Cache(CacheArgs),
    #[command(about = "Build and validate catalogs")]
    Catalog(CatalogArgs),
    #[command(about = "Fetch reference genomes for a catalog")]
    Genome(GenomeArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(short, long, default_value = "vhdb.tsv")]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct InfoArgs {
    source: Utf8PathBuf,
}

#[derive(Args)]
struct FamiliesArgs {
    source: Utf8PathBuf,

    #[arg(long, value_enum, default_value_t = CatalogMode::Clinical)]
    mode: CatalogMode,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Download the latest table straight into the cache")]
    Download,
    #[command(about = "Add a local table to the cache")]
    Add { path: Utf8PathBuf },
    #[command(about = "List cached tables, newest first")]
    List,
    #[command(about = "Copy or link a cached table into place")]
    Use(CacheUseArgs),
}

#[derive(Args)]
struct CacheUseArgs {
    /// Hash prefix (at least 8 hex characters).
    hash: String,

    #[arg(short, long, default_value = "vhdb.tsv")]
    output: Utf8PathBuf,

    /// Symlink instead of copying.
    #[arg(long)]
    link: bool,
}

#[derive(Args)]
struct CatalogArgs {
    #[command(subcommand)]
    command: CatalogCommand,
}

#[derive(Subcommand)]
enum CatalogCommand {
    #[command(about = "Build a catalog and its metadata")]
    Build(BuildArgs),
    #[command(about = "Check a catalog against its metadata and source")]
    Validate(ValidateArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Source table; omit when using --from-cache.
    #[arg(required_unless_present = "from_cache", conflicts_with = "from_cache")]
    source: Option<Utf8PathBuf>,

    /// Build from a cached table identified by hash prefix.
    #[arg(long)]
    from_cache: Option<String>,

    #[arg(long, value_enum)]
    mode: Option<CatalogMode>,

    #[arg(long, conflicts_with = "exclude_bacteriophages")]
    include_bacteriophages: bool,

    #[arg(long)]
    exclude_bacteriophages: bool,

    #[arg(long, value_enum)]
    primate_homologs: Option<PrimateHomologMode>,

    /// Comma-separated family allow-list for primate homologs, or `high-diversity`.
    #[arg(long)]
    primate_families: Option<String>,

    #[arg(short, long)]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct ValidateArgs {
    catalog: Utf8PathBuf,

    /// Source table to hash instead of the path recorded in the metadata.
    #[arg(long)]
    source: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct GenomeArgs {
    #[command(subcommand)]
    command: GenomeCommand,
}

#[derive(Subcommand)]
enum GenomeCommand {
    #[command(about = "Download RefSeq genomes for every catalog entry")]
    Fetch(GenomeFetchArgs),
}

#[derive(Args)]
struct GenomeFetchArgs {
    catalog: Utf8PathBuf,

    #[arg(short, long)]
    output: Utf8PathBuf,

    /// Contact address sent to NCBI with every request.
    #[arg(long)]
    email: String,

    /// NCBI API key (default: $NCBI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between batches.
    #[arg(long)]
    delay: Option<f64>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<VirotaxaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &VirotaxaError) -> u8 {
    match error {
        VirotaxaError::Configuration(_)
        | VirotaxaError::ConfigRead(_)
        | VirotaxaError::ConfigParse(_)
        | VirotaxaError::HashNotFound(_)
        | VirotaxaError::AmbiguousHash { .. }
        | VirotaxaError::InvalidHashPrefix(_) => 2,
        VirotaxaError::SourceHttp(_)
        | VirotaxaError::SourceStatus { .. }
        | VirotaxaError::NcbiHttp(_)
        | VirotaxaError::NcbiStatus { .. } => 3,
        VirotaxaError::ValidationMismatch(_)
        | VirotaxaError::EmptyCatalog { .. }
        | VirotaxaError::CacheCorrupted { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let cache_root = match cli.cache_dir.clone().or_else(|| config.cache_dir.clone()) {
        Some(dir) => dir,
        None => CacheRegistry::default_root()?,
    };
    let cache = CacheRegistry::open(cache_root)?;

    match cli.command {
        Commands::Download(args) => {
            let app = App::new(cache, VhdbHttpClient::new()?);
            match output_mode {
                OutputMode::Json => JsonOutput::print(&app.download(&args.output, &JsonOutput)?)
                    .into_diagnostic()?,
                OutputMode::Console => {
                    ConsoleOutput::print_download(&app.download(&args.output, &ConsoleOutput)?)
                }
            }
        }
        Commands::Info(args) => {
            let app = App::new(cache, NopSource);
            match output_mode {
                OutputMode::Json => {
                    JsonOutput::print(&app.info(&args.source, &JsonOutput)?).into_diagnostic()?
                }
                OutputMode::Console => {
                    ConsoleOutput::print_info(&app.info(&args.source, &ConsoleOutput)?)
                }
            }
        }
        Commands::Families(args) => {
            let app = App::new(cache, NopSource);
            match output_mode {
                OutputMode::Json => JsonOutput::print(&app.families(
                    &args.source,
                    args.mode,
                    &JsonOutput,
                )?)
                .into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_families(&app.families(
                    &args.source,
                    args.mode,
                    &ConsoleOutput,
                )?),
            }
        }
        Commands::Cache(args) => run_cache(args.command, cache, output_mode)?,
        Commands::Catalog(args) => run_catalog(args.command, cache, &config, output_mode)?,
        Commands::Genome(args) => match args.command {
            GenomeCommand::Fetch(args) => run_genome_fetch(args, cache, output_mode)?,
        },
    }
    Ok(())
}

fn run_cache(
    command: CacheCommand,
    cache: CacheRegistry,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        CacheCommand::Download => {
            let app = App::new(cache, VhdbHttpClient::new()?);
            match output_mode {
                OutputMode::Json => {
                    JsonOutput::print(&app.cache_download(&JsonOutput)?).into_diagnostic()?
                }
                OutputMode::Console => {
                    ConsoleOutput::print_cache_store(&app.cache_download(&ConsoleOutput)?)
                }
            }
        }
        CacheCommand::Add { path } => {
            let app = App::new(cache, NopSource);
            match output_mode {
                OutputMode::Json => {
                    JsonOutput::print(&app.cache_add(&path, &JsonOutput)?).into_diagnostic()?
                }
                OutputMode::Console => {
                    ConsoleOutput::print_cache_store(&app.cache_add(&path, &ConsoleOutput)?)
                }
            }
        }
        CacheCommand::List => {
            let app = App::new(cache, NopSource);
            match output_mode {
                OutputMode::Json => {
                    JsonOutput::print(&app.cache_list(&JsonOutput)?).into_diagnostic()?
                }
                OutputMode::Console => {
                    ConsoleOutput::print_cache_list(&app.cache_list(&ConsoleOutput)?)
                }
            }
        }
        CacheCommand::Use(args) => {
            let app = App::new(cache, NopSource);
            let prefix: HashPrefix = args.hash.parse()?;
            let mode = if args.link {
                MaterializeMode::Link
            } else {
                MaterializeMode::Copy
            };
            match output_mode {
                OutputMode::Json => JsonOutput::print(&app.cache_use(
                    &prefix,
                    &args.output,
                    mode,
                    &JsonOutput,
                )?)
                .into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_cache_use(&app.cache_use(
                    &prefix,
                    &args.output,
                    mode,
                    &ConsoleOutput,
                )?),
            }
        }
    }
    Ok(())
}

fn run_catalog(
    command: CatalogCommand,
    cache: CacheRegistry,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let app = App::new(cache, NopSource);
    match command {
        CatalogCommand::Build(args) => {
            let source = match (&args.source, &args.from_cache) {
                (_, Some(hash)) => BuildSource::Cache(hash.parse()?),
                (Some(path), None) => BuildSource::Path(path.clone()),
                (None, None) => {
                    return Err(VirotaxaError::Configuration(
                        "a source path or --from-cache is required".to_string(),
                    )
                    .into());
                }
            };
            let params = build_parameters(&args, &config.build)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print(&app.build(
                    &source,
                    &params,
                    &args.output,
                    &JsonOutput,
                )?)
                .into_diagnostic()?,
                OutputMode::Console => ConsoleOutput::print_build(&app.build(
                    &source,
                    &params,
                    &args.output,
                    &ConsoleOutput,
                )?),
            }
        }
        CatalogCommand::Validate(args) => {
            let report = match output_mode {
                OutputMode::Json => {
                    let report = app.validate(&args.catalog, args.source.as_deref(), &JsonOutput)?;
                    JsonOutput::print(&report).into_diagnostic()?;
                    report
                }
                OutputMode::Console => {
                    let report =
                        app.validate(&args.catalog, args.source.as_deref(), &ConsoleOutput)?;
                    ConsoleOutput::print_validation(&report);
                    report
                }
            };
            report.into_result()?;
        }
    }
    Ok(())
}

/// CLI flags override the resolved config.
fn build_parameters(
    args: &BuildArgs,
    defaults: &BuildParameters,
) -> Result<BuildParameters, VirotaxaError> {
    let exclude_bacteriophages = if args.include_bacteriophages {
        false
    } else if args.exclude_bacteriophages {
        true
    } else {
        defaults.exclude_bacteriophages
    };
    let primate_families = match &args.primate_families {
        Some(value) if value.contains(',') => Some(resolve_families(FamilyList::Explicit(
            value.split(',').map(str::to_string).collect(),
        ))?),
        Some(value) => Some(
            resolve_families(FamilyList::Preset(value.clone())).or_else(|_| {
                resolve_families(FamilyList::Explicit(vec![value.clone()]))
            })?,
        ),
        None => defaults.primate_families.clone(),
    };
    Ok(BuildParameters {
        mode: args.mode.unwrap_or(defaults.mode),
        exclude_bacteriophages,
        primate_homologs: args.primate_homologs.unwrap_or(defaults.primate_homologs),
        primate_families,
    })
}

fn run_genome_fetch(
    args: GenomeFetchArgs,
    cache: CacheRegistry,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let api_key = args
        .api_key
        .or_else(|| std::env::var("NCBI_API_KEY").ok())
        .filter(|key| !key.trim().is_empty());
    let client = NcbiEfetchClient::new(args.email.clone(), api_key)?;
    let delay = match args.delay {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(secs) => {
            return Err(VirotaxaError::Configuration(format!("invalid delay: {secs}")).into());
        }
        None => None,
    };
    let options = GenomeFetchOptions {
        email: args.email,
        batch_size: args.batch_size,
        delay,
    };
    let app = App::new(cache, NopSource);
    match output_mode {
        OutputMode::Json => JsonOutput::print(&app.genome_fetch(
            &client,
            &args.catalog,
            &args.output,
            &options,
            &JsonOutput,
        )?)
        .into_diagnostic()?,
        OutputMode::Console => ConsoleOutput::print_genome_fetch(&app.genome_fetch(
            &client,
            &args.catalog,
            &args.output,
            &options,
            &ConsoleOutput,
        )?),
    }
    Ok(())
}

struct NopSource;

impl SourceClient for NopSource {
    fn download(&self, _url: &str) -> Result<DownloadedSource, VirotaxaError> {
        Err(VirotaxaError::SourceHttp(
            "source client not configured".to_string(),
        ))
    }
}
