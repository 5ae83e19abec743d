use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use egameta::alignment::BamHeaderReader;
use egameta::client::{Credentials, FileUpload, RestClient, SubmitAction};
use egameta::config::{ConfigLoader, EgaConfig};
use egameta::domain::{AnalysisAccession, PolicyAccession, SchemaKind, StudyAccession};
use egameta::error::EgaError;
use egameta::graph::SparqlHttpStore;
use egameta::metadata::{build_dataset, build_file_set, build_sample_set};
use egameta::reconcile::update_accessions;
use egameta::reference::ReferenceAssembly;
use egameta::xml::{
    Receipt, collect_attribute, write_analysis_set, write_datasets, write_sample_set,
};

#[derive(Parser)]
#[command(name = "egameta")]
#[command(about = "Prepare, submit and reconcile EGA metadata XML backed by a local graph store")]
#[command(version, author)]
struct Cli {
    /// Path to the config file (default: egameta.json in current directory)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Prepare ANALYSIS.xml metadata describing bams transferred to the archive")]
    Analysis(AnalysisArgs),
    #[command(about = "Prepare SAMPLE.xml metadata describing samples used in submitted analyses")]
    Sample(SampleArgs),
    #[command(about = "Prepare DATASET.xml metadata describing a dataset of accessioned analyses")]
    Dataset(DatasetArgs),
    #[command(about = "Submit prepared metadata, with either ADD or VALIDATE action")]
    Submit(SubmitArgs),
    #[command(about = "Update local accessions from a submission receipt")]
    UpdateDb(UpdateDbArgs),
    #[command(about = "Retrieve archive metadata for an accessioned entity")]
    Retrieve(RetrieveArgs),
}

#[derive(Args)]
struct AnalysisArgs {
    /// Graph store environment, as named in the config
    #[arg(short = 'e', long)]
    environment: String,

    /// Path to an original (unencrypted) bam; repeat for multiple bams
    #[arg(short = 'i', long = "input", required = true)]
    inputs: Vec<Utf8PathBuf>,

    /// Directory containing the [bam].md5 and [bam].gpg.md5 files
    #[arg(long)]
    checksum_files_dir: Utf8PathBuf,

    /// Directory in the archive upload box holding the encrypted bams
    #[arg(long)]
    ega_submission_dir: Utf8PathBuf,

    #[arg(long, value_name = "EGASXXXXXXXXXXX")]
    study_ref_accession: StudyAccession,

    /// Include analyses that already have an accession recorded in the db
    #[arg(long)]
    include_accessioned: bool,

    /// Skip the database and emit scaffold metadata against this assembly
    #[arg(long, value_name = "ASSEMBLY")]
    no_db_reference: Option<String>,

    /// Output path; use - for stdout
    #[arg(short = 'o', long, default_value = "ANALYSIS.xml")]
    output: String,
}

#[derive(Args)]
struct SampleArgs {
    #[arg(short = 'e', long)]
    environment: String,

    /// Prepared ANALYSIS.xml containing SAMPLE_REF elements with refname
    #[arg(short = 'x', long)]
    analysis_xml: Option<Utf8PathBuf>,

    /// Collected sample uuid; repeat for multiple samples
    #[arg(short = 's', long = "sample")]
    samples: Vec<String>,

    /// Include samples that already have an accession recorded in the db
    #[arg(long)]
    include_accessioned: bool,

    /// Output path; use - for stdout
    #[arg(short = 'o', long, default_value = "SAMPLE.xml")]
    output: String,
}

#[derive(Args)]
struct DatasetArgs {
    /// Receipt XML from an analysis submission with accessioned elements
    #[arg(short = 'x', long)]
    analysis_receipt: Option<Utf8PathBuf>,

    /// Analysis accession; repeat for multiple analyses
    #[arg(short = 's', long = "analysis", value_name = "EGAZXXXXXXXXXXX")]
    analyses: Vec<AnalysisAccession>,

    /// Short, distinctive alias for the dataset
    #[arg(short = 'a', long)]
    alias: String,

    #[arg(short = 't', long)]
    title: String,

    #[arg(short = 'd', long)]
    description: String,

    /// ICGC project, covered by the existing ICGC data access policy
    #[arg(long)]
    icgc: bool,

    /// Data access policy accession; required iff --icgc is not given
    #[arg(long, value_name = "EGAPXXXXXXXXXXX")]
    policy_accession: Option<PolicyAccession>,

    /// Output path; use - for stdout
    #[arg(short = 'o', long, default_value = "DATASET.xml")]
    output: String,
}

#[derive(Args)]
struct SubmitArgs {
    /// Short, distinctive alias for the submission, e.g. "<initials> `date`"
    #[arg(short = 'a', long)]
    alias: Option<String>,

    /// Submission account; defaults to the configured account name
    #[arg(long)]
    account: Option<String>,

    #[arg(long)]
    password_file: Utf8PathBuf,

    /// ADD the metadata
    #[arg(long)]
    add: bool,

    /// VALIDATE the metadata
    #[arg(long)]
    validate: bool,

    /// Path to a prepared ANALYSIS.xml
    #[arg(long)]
    analysis_file: Option<Utf8PathBuf>,

    /// Path to a prepared DATASET.xml
    #[arg(long)]
    dataset_file: Option<Utf8PathBuf>,

    /// Path to a prepared SAMPLE.xml
    #[arg(long)]
    sample_file: Option<Utf8PathBuf>,

    /// Submit to the test endpoint; metadata is deleted after 24 hours
    #[arg(long)]
    test: bool,

    /// Receipt output path; use - for stdout
    #[arg(short = 'o', long, default_value = "RECEIPT.xml")]
    output: String,
}

#[derive(Args)]
struct UpdateDbArgs {
    #[arg(short = 'e', long)]
    environment: String,

    /// Receipt XML from a submission containing ANALYSIS and/or SAMPLE
    /// elements with alias and accession attributes
    #[arg(short = 'x', long)]
    receipt_xml: Utf8PathBuf,
}

#[derive(Args)]
struct RetrieveArgs {
    #[arg(long)]
    account: Option<String>,

    #[arg(long)]
    password_file: Utf8PathBuf,

    /// Schema kind of the entity: analysis, dataset, sample, study, policy
    schema: SchemaKind,

    /// Archive accession of the entity
    accession: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(ega) = report.downcast_ref::<EgaError>() {
            return ExitCode::from(map_exit_code(ega));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EgaError) -> u8 {
    match error {
        EgaError::MetadataConstruction(_)
        | EgaError::AccessionUpdate(_)
        | EgaError::SubmissionFailed(_)
        | EgaError::CredentialSource
        | EgaError::InvalidAccession { .. }
        | EgaError::InvalidSchemaKind(_)
        | EgaError::UnknownAssembly(_)
        | EgaError::UnknownSpecies(_)
        | EgaError::UnknownEnvironment(_)
        | EgaError::MissingConfig
        | EgaError::ConfigRead(_)
        | EgaError::ConfigParse(_)
        | EgaError::ChecksumNotFound { .. }
        | EgaError::Xml(_) => 2,
        EgaError::GraphHttp(_)
        | EgaError::GraphStatus { .. }
        | EgaError::ArchiveHttp(_)
        | EgaError::ArchiveStatus { .. }
        | EgaError::SessionUnavailable(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = ConfigLoader::resolve(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Analysis(args) => run_analysis(args, &config),
        Commands::Sample(args) => run_sample(args, &config),
        Commands::Dataset(args) => run_dataset(args, &config),
        Commands::Submit(args) => run_submit(args, &config),
        Commands::UpdateDb(args) => run_update_db(args, &config),
        Commands::Retrieve(args) => run_retrieve(args, &config),
    }
}

fn init_tracing(log_file: Option<&Utf8Path>) -> miette::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false);
    match log_file {
        Some(path) => {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .map_err(|err| EgaError::Filesystem(format!("open log file {path}: {err}")))
                .into_diagnostic()?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            builder.with_writer(io::stderr).init();
        }
    }
    Ok(())
}

fn graph_store(config: &EgaConfig, environment: &str) -> Result<SparqlHttpStore, EgaError> {
    let endpoints = config.environment(environment)?;
    SparqlHttpStore::new(endpoints, config.archive.timeout_secs)
}

fn run_analysis(args: AnalysisArgs, config: &EgaConfig) -> miette::Result<()> {
    let store = graph_store(config, &args.environment).into_diagnostic()?;
    let no_db_reference = args
        .no_db_reference
        .as_deref()
        .map(ReferenceAssembly::from_name)
        .transpose()
        .into_diagnostic()?;

    let set = build_file_set(
        &store,
        &BamHeaderReader,
        &args.inputs,
        &args.checksum_files_dir,
        &args.study_ref_accession,
        &args.ega_submission_dir,
        no_db_reference,
        args.include_accessioned,
    )
    .into_diagnostic()?;

    let xml = write_analysis_set(&set).into_diagnostic()?;
    write_document(&args.output, &xml).into_diagnostic()
}

fn run_sample(args: SampleArgs, config: &EgaConfig) -> miette::Result<()> {
    if args.analysis_xml.is_some() == !args.samples.is_empty() {
        return Err(miette::Report::msg(
            "either --analysis-xml or a list of --sample uuids is required",
        ));
    }

    let samples = match &args.analysis_xml {
        Some(path) => {
            let content = read_input(path).into_diagnostic()?;
            collect_attribute(&content, "SAMPLE_REF", "refname").into_diagnostic()?
        }
        None => args.samples.clone(),
    };

    let store = graph_store(config, &args.environment).into_diagnostic()?;
    let set = build_sample_set(&store, &samples, args.include_accessioned).into_diagnostic()?;
    let xml = write_sample_set(&set).into_diagnostic()?;
    write_document(&args.output, &xml).into_diagnostic()
}

fn run_dataset(args: DatasetArgs, config: &EgaConfig) -> miette::Result<()> {
    if args.analysis_receipt.is_some() == !args.analyses.is_empty() {
        return Err(miette::Report::msg(
            "either --analysis-receipt or a list of --analysis accessions is required",
        ));
    }

    let analyses = match &args.analysis_receipt {
        Some(path) => {
            let content = read_input(path).into_diagnostic()?;
            collect_attribute(&content, "ANALYSIS", "accession")
                .into_diagnostic()?
                .iter()
                .map(|value| value.parse::<AnalysisAccession>())
                .collect::<Result<Vec<_>, _>>()
                .into_diagnostic()?
        }
        None => args.analyses.clone(),
    };

    let dataset = build_dataset(
        &args.alias,
        &args.title,
        &args.description,
        analyses,
        args.policy_accession.clone(),
        args.icgc,
        Vec::new(),
        &config.archive,
    )
    .into_diagnostic()?;

    let xml = write_datasets(&egameta::metadata::Datasets {
        datasets: vec![dataset],
    })
    .into_diagnostic()?;
    write_document(&args.output, &xml).into_diagnostic()
}

fn run_submit(args: SubmitArgs, config: &EgaConfig) -> miette::Result<()> {
    if args.add == args.validate {
        return Err(miette::Report::msg(
            "exactly one of --add or --validate is required",
        ));
    }
    let action = if args.add {
        SubmitAction::Add
    } else {
        SubmitAction::Validate
    };

    let mut uploads = Vec::new();
    for (schema, path) in [
        (SchemaKind::Analysis, &args.analysis_file),
        (SchemaKind::Dataset, &args.dataset_file),
        (SchemaKind::Sample, &args.sample_file),
    ] {
        if let Some(path) = path {
            uploads.push(FileUpload {
                schema,
                source: path.to_string(),
                data: read_input(path).into_diagnostic()?,
            });
        }
    }
    if uploads.is_empty() {
        return Err(miette::Report::msg("no schema file specified"));
    }

    let account = args
        .account
        .clone()
        .or_else(|| config.archive.account_name.clone())
        .ok_or_else(|| miette::Report::msg("no account given and none configured"))?;

    let client = RestClient::new(
        &config.archive,
        Credentials {
            user: account,
            password: None,
            password_file: Some(args.password_file.clone()),
        },
        args.test,
    )
    .into_diagnostic()?;

    let mut receipt_out = open_output(&args.output).into_diagnostic()?;
    client
        .submit(&uploads, action, args.alias.clone(), receipt_out.as_mut())
        .into_diagnostic()
}

fn run_update_db(args: UpdateDbArgs, config: &EgaConfig) -> miette::Result<()> {
    let content = read_input(&args.receipt_xml).into_diagnostic()?;
    let receipt = Receipt::parse(&content).into_diagnostic()?;
    let store = graph_store(config, &args.environment).into_diagnostic()?;
    let summary = update_accessions(&store, &receipt).into_diagnostic()?;
    println!(
        "{} accessions updated, {} already up to date",
        summary.updated, summary.unchanged
    );
    Ok(())
}

fn run_retrieve(args: RetrieveArgs, config: &EgaConfig) -> miette::Result<()> {
    let account = args
        .account
        .clone()
        .or_else(|| config.archive.account_name.clone())
        .ok_or_else(|| miette::Report::msg("no account given and none configured"))?;

    let client = RestClient::new(
        &config.archive,
        Credentials {
            user: account,
            password: None,
            password_file: Some(args.password_file.clone()),
        },
        false,
    )
    .into_diagnostic()?;

    let metadata = client
        .retrieve_metadata(args.schema, &args.accession)
        .into_diagnostic()?;
    let rendered = serde_json::to_string_pretty(&metadata).into_diagnostic()?;
    println!("{rendered}");
    Ok(())
}

fn read_input(path: &Utf8Path) -> Result<String, EgaError> {
    fs::read_to_string(path.as_std_path())
        .map_err(|err| EgaError::Filesystem(format!("read {path}: {err}")))
}

fn write_document(path: &str, content: &str) -> Result<(), EgaError> {
    if path == "-" {
        io::stdout()
            .write_all(content.as_bytes())
            .map_err(|err| EgaError::Filesystem(format!("write stdout: {err}")))
    } else {
        fs::write(path, content)
            .map_err(|err| EgaError::Filesystem(format!("write {path}: {err}")))
    }
}

fn open_output(path: &str) -> Result<Box<dyn Write>, EgaError> {
    if path == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        let file = fs::File::create(path)
            .map_err(|err| EgaError::Filesystem(format!("create {path}: {err}")))?;
        Ok(Box::new(file))
    }
}
