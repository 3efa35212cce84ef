use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use metagoflow_crate::app::{App, BatchResult, BuildOptions, ProgressSink, RunOutcome};
use metagoflow_crate::codec::SystemCodec;
use metagoflow_crate::config::{BatchPolicy, ConfigLoader, PackageFormat, Settings};
use metagoflow_crate::domain::{ProvenanceRecord, RefCodeRecord, RunId, SampleRun};
use metagoflow_crate::error::{CrateError, ErrorCategory};
use metagoflow_crate::graph::{GraphAssembler, MetadataTemplate};
use metagoflow_crate::lookup::{CsvLookup, LookupService};
use metagoflow_crate::output::{JsonOutput, LogSink, OutputMode};
use metagoflow_crate::workspace::Workspace;

const DEFAULT_RENDERER: &str = "rochtml";

#[derive(Parser)]
#[command(name = "mgf-crate")]
#[command(about = "Normalize MetaGOflow run archives and package them as RO-Crates")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Tool settings (object store root, lookup tables, output format)")]
    settings: Option<PathBuf>,

    #[arg(long, global = true, default_value = ".", help = "Directory holding run archives")]
    work_dir: PathBuf,

    #[arg(long, global = true, help = "Directory receiving finished packages (defaults to --work-dir)")]
    output: Option<PathBuf>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Package one run archive as an RO-Crate")]
    Build(BuildArgs),
    #[command(about = "Package every run archive in the work directory")]
    Batch(BatchArgs),
    #[command(about = "Extract a run archive into its canonical directory")]
    Open(ArchiveArgs),
    #[command(about = "Repack an archive that lacked its top-level directory")]
    Repair(ArchiveArgs),
    #[command(about = "Create a structure-only copy of an open archive")]
    Ghost(ArchiveArgs),
    #[command(about = "Compress bulky sequence files and move the run to prepared_archives")]
    Prepare(ArchiveArgs),
    #[command(about = "Look up a run's ref code, or the run that sequenced a sample")]
    Lookup(LookupArgs),
}

#[derive(Args, Clone)]
struct PackageArgs {
    #[arg(long, help = "Run configuration (YAML)")]
    config: PathBuf,

    #[arg(long)]
    template: Option<PathBuf>,

    #[arg(long)]
    object_store_root: Option<String>,

    #[arg(long)]
    format: Option<PackageFormat>,

    #[arg(long, help = "Render ro-crate-preview.html next to the metadata")]
    preview: bool,

    #[arg(long)]
    preview_renderer: Option<String>,

    #[arg(long, help = "Leave archives without a top-level directory unrepaired")]
    no_repair: bool,
}

#[derive(Args)]
struct BuildArgs {
    archive: PathBuf,

    #[command(flatten)]
    package: PackageArgs,
}

#[derive(Args)]
struct BatchArgs {
    #[command(flatten)]
    package: PackageArgs,

    #[arg(long)]
    policy: Option<BatchPolicy>,
}

#[derive(Args)]
struct ArchiveArgs {
    archive: PathBuf,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct LookupArgs {
    #[arg(long)]
    run_id: Option<String>,

    #[arg(long)]
    source_mat_id: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CrateError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CrateError) -> u8 {
    match error.category() {
        ErrorCategory::Configuration | ErrorCategory::MissingData => 2,
        ErrorCategory::Lookup | ErrorCategory::ExternalTool => 3,
        ErrorCategory::Archive => 4,
        ErrorCategory::Filesystem => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let settings = Settings::load(cli.settings.as_deref())?;
    let output_root = cli.output.clone().unwrap_or_else(|| cli.work_dir.clone());
    let workspace = Workspace::from_std(&cli.work_dir, &output_root)?;

    match cli.command {
        Commands::Build(args) => {
            let config = ConfigLoader::resolve(&args.package.config)?;
            let options = build_options(&args.package, &settings)?;
            let app = package_app(workspace, &args.package, &settings)?;
            let outcome = app.build(&args.archive, &config, &options, sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_run(&outcome).into_diagnostic()?,
                OutputMode::Human => print_run_summary(&outcome),
            }
            Ok(())
        }
        Commands::Batch(args) => {
            let config = ConfigLoader::resolve(&args.package.config)?;
            let options = build_options(&args.package, &settings)?;
            let policy = args.policy.unwrap_or(settings.batch_policy);
            let app = package_app(workspace, &args.package, &settings)?;
            let result = app.batch(&config, &options, policy, sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_batch(&result).into_diagnostic()?,
                OutputMode::Human => print_batch_summary(&result),
            }
            Ok(())
        }
        Commands::Open(args) => {
            let app = archive_app(workspace)?;
            let open = app.open(&args.archive, sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_open(&open).into_diagnostic()?,
                OutputMode::Human => println!("{} ({:?})", open.root, open.state),
            }
            Ok(())
        }
        Commands::Repair(args) => {
            let app = archive_app(workspace)?;
            let fixed = app.repair(&args.archive, sink(output_mode))?;
            match (output_mode, fixed) {
                (OutputMode::Json, fixed) => JsonOutput::print_json(&fixed).into_diagnostic()?,
                (OutputMode::Human, Some(path)) => println!("fixed archive: {path}"),
                (OutputMode::Human, None) => println!("nothing to repair"),
            }
            Ok(())
        }
        Commands::Ghost(args) => {
            let app = archive_app(workspace)?;
            let ghost = app.ghost(&args.archive, sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_ghost(&ghost).into_diagnostic()?,
                OutputMode::Human => println!("ghost archive: {} ({} files)", ghost.path, ghost.files),
            }
            Ok(())
        }
        Commands::Prepare(args) => {
            let app = archive_app(workspace)?;
            let prepared = app.prepare(&args.archive, sink(output_mode))?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_prepare(&prepared).into_diagnostic()?,
                OutputMode::Human if prepared.skipped => {
                    println!("already prepared: {}", prepared.path)
                }
                OutputMode::Human => println!(
                    "prepared {} ({} files compressed)",
                    prepared.path,
                    prepared.compressed.len()
                ),
            }
            Ok(())
        }
        Commands::Lookup(args) => {
            let lookup = CsvLookup::new(settings.lookup.clone())?;
            if let Some(source_mat_id) = args.source_mat_id {
                let sample = lookup.resolve_source_mat_id(source_mat_id.trim())?;
                match output_mode {
                    OutputMode::Json => JsonOutput::print_json(&sample).into_diagnostic()?,
                    OutputMode::Human => {
                        println!("Run ID: {}", sample.run_id);
                        println!("Ref Code: {}", sample.ref_code);
                    }
                }
            } else if let Some(run_id) = args.run_id {
                let run_id: RunId = run_id.parse()?;
                let record = lookup.resolve_ref_code(&run_id)?;
                match output_mode {
                    OutputMode::Json => JsonOutput::print_json(&record).into_diagnostic()?,
                    OutputMode::Human => {
                        println!("Ref Code: {}", record.ref_code);
                        println!("Prefix: {}", record.prefix);
                        println!("Batch: {}", record.batch_number);
                    }
                }
            }
            Ok(())
        }
    }
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    }
}

fn build_options(args: &PackageArgs, settings: &Settings) -> Result<BuildOptions, CrateError> {
    let object_store_root = match &args.object_store_root {
        Some(root) => root.trim_end_matches('/').to_string(),
        None => settings.require_object_store_root()?.to_string(),
    };
    let preview_renderer = if args.preview || args.preview_renderer.is_some() {
        Some(
            args.preview_renderer
                .clone()
                .or_else(|| settings.preview_renderer.clone())
                .unwrap_or_else(|| DEFAULT_RENDERER.to_string()),
        )
    } else {
        settings.preview_renderer.clone()
    };
    Ok(BuildOptions {
        object_store_root,
        format: args.format.unwrap_or(settings.package_format),
        preview_renderer,
        today: chrono::Local::now().date_naive(),
        repair: !args.no_repair,
    })
}

fn package_app(
    workspace: Workspace,
    args: &PackageArgs,
    settings: &Settings,
) -> Result<App<CsvLookup, SystemCodec>, CrateError> {
    let template = match args.template.as_deref().or(settings.template.as_deref()) {
        Some(path) => MetadataTemplate::load(path)?,
        None => MetadataTemplate::builtin()?,
    };
    let lookup = CsvLookup::new(settings.lookup.clone())?;
    let codec = SystemCodec::detect()?;
    Ok(App::new(
        workspace,
        lookup,
        codec,
        GraphAssembler::new(template),
    ))
}

fn archive_app(workspace: Workspace) -> Result<App<NopLookup, SystemCodec>, CrateError> {
    let codec = SystemCodec::detect()?;
    Ok(App::new(
        workspace,
        NopLookup,
        codec,
        GraphAssembler::new(MetadataTemplate::builtin()?),
    ))
}

fn print_run_summary(outcome: &RunOutcome) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    match outcome {
        RunOutcome::Packaged {
            run_id,
            ref_code,
            archive_state,
            fixed_archive,
            missing,
            package,
        } => {
            println!("{green}packaged {run_id} as {ref_code}{reset}");
            println!("   archive: {archive_state:?}");
            if let Some(fixed) = fixed_archive {
                println!("   fixed archive: {fixed}");
            }
            println!("   package: {} ({} files)", package.path, package.files);
            for path in missing {
                println!("{yellow}   missing (allowed): {path}{reset}");
            }
        }
        RunOutcome::Skipped { run_id, reason } => {
            println!("{yellow}skipped {run_id}: {reason}{reset}");
        }
    }
}

fn print_batch_summary(result: &BatchResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!(
        "{green}packaged: {}{reset}  {yellow}skipped: {}{reset}  {red}failed: {}{reset}",
        result.count("packaged"),
        result.count("skipped"),
        result.count("failed")
    );
    for item in &result.items {
        let color = match item.status.as_str() {
            "packaged" => green,
            "skipped" => yellow,
            _ => red,
        };
        let detail = item
            .package
            .as_deref()
            .or(item.reason.as_deref())
            .unwrap_or_default();
        println!("{color}{} {}: {detail}{reset}", item.status, item.archive);
    }
}

struct NopLookup;

impl LookupService for NopLookup {
    fn resolve_ref_code(&self, _run_id: &RunId) -> Result<RefCodeRecord, CrateError> {
        Err(CrateError::LookupHttp(
            "lookup service not configured".to_string(),
        ))
    }

    fn resolve_provenance(&self, _ref_code: &str) -> Result<ProvenanceRecord, CrateError> {
        Err(CrateError::LookupHttp(
            "lookup service not configured".to_string(),
        ))
    }

    fn resolve_ena_accession(
        &self,
        _ref_code: &str,
        _batch_number: u32,
    ) -> Result<String, CrateError> {
        Err(CrateError::LookupHttp(
            "lookup service not configured".to_string(),
        ))
    }

    fn resolve_source_mat_id(&self, _source_mat_id: &str) -> Result<SampleRun, CrateError> {
        Err(CrateError::LookupHttp(
            "lookup service not configured".to_string(),
        ))
    }
}
