use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use midfile::app::{App, ProgressSink, init_catalog};
use midfile::cloud::{CloudStore, S3CloudStore};
use midfile::config::ConfigLoader;
use midfile::domain::{Column, NewFileRecord, QueryConditions};
use midfile::error::MidfileError;
use midfile::output::{HumanOutput, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "midfile")]
#[command(about = "Catalog of intermediate files produced by bioinformatics pipelines")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to $MIDFILE_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the catalog database and record it in the config")]
    Init(InitArgs),
    #[command(about = "Insert one file record")]
    Insert(InsertArgs),
    #[command(name = "insert_ref", about = "Insert align/anno reference versions for a subproject")]
    InsertRef(InsertRefArgs),
    #[command(about = "Update one column of a file record")]
    Update(UpdateArgs),
    #[command(name = "l2c", about = "Upload a local file to cloud storage")]
    L2c(L2cArgs),
    #[command(name = "c2l", about = "Download a cloud object to a local path")]
    C2l(C2lArgs),
    #[command(about = "Show the record for a filepath")]
    Check(CheckArgs),
    #[command(name = "query_file", about = "Export matching file records as TSV")]
    QueryFile(QueryFileArgs),
    #[command(name = "query_ref", about = "Export reference versions of a subproject as TSV")]
    QueryRef(QueryRefArgs),
    #[command(about = "List distinct product/ftype/fileformat combinations")]
    Info,
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    dbdir: Utf8PathBuf,
}

#[derive(Args)]
struct InsertArgs {
    #[arg(short = 'p', long = "subprojectid")]
    subprojectid: String,
    #[arg(short = 'r', long)]
    product: Option<String>,
    #[arg(short = 's', long)]
    sample: Option<String>,
    #[arg(short = 't', long)]
    ftype: Option<String>,
    #[arg(short = 'f', long)]
    fileformat: Option<String>,
    #[arg(short = 'd', long)]
    filepath: String,
}

#[derive(Args)]
struct InsertRefArgs {
    #[arg(short = 'p', long = "subprojectid")]
    subprojectid: String,
    #[arg(short = 'l', long)]
    alignref: Option<String>,
    #[arg(short = 'n', long)]
    annoref: Option<String>,
}

#[derive(Args)]
struct UpdateArgs {
    #[arg(short = 'd', long)]
    filepath: String,
    #[arg(short = 'k', long)]
    key: String,
    #[arg(short = 'v', long)]
    value: String,
}

#[derive(Args)]
struct L2cArgs {
    #[arg(short = 'b', long)]
    bucket: Option<String>,
    #[arg(short = 'l', long = "local_path")]
    local_path: Utf8PathBuf,
    #[arg(short = 'c', long = "cloud_path")]
    cloud_path: String,
}

#[derive(Args)]
struct C2lArgs {
    #[arg(short = 'b', long)]
    bucket: Option<String>,
    #[arg(short = 'c', long = "cloud_path")]
    cloud_path: String,
    #[arg(short = 'o', long)]
    outpath: Utf8PathBuf,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(short = 'f', long)]
    filepath: String,
}

#[derive(Args)]
struct QueryFileArgs {
    #[arg(value_name = "OUTPUT_PATH")]
    outfile: Utf8PathBuf,
    #[arg(short = 'p', long = "subprojectid")]
    subprojectid: Option<String>,
    #[arg(short = 'r', long)]
    product: Option<String>,
    #[arg(short = 's', long)]
    sample: Option<String>,
    #[arg(short = 't', long)]
    ftype: Option<String>,
    #[arg(short = 'f', long)]
    fileformat: Option<String>,
    #[arg(short = 'd', long)]
    filepath: Option<String>,
}

#[derive(Args)]
struct QueryRefArgs {
    #[arg(value_name = "OUTPUT_PATH")]
    outfile: Utf8PathBuf,
    #[arg(short = 'p', long = "subprojectid")]
    subprojectid: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MidfileError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MidfileError) -> u8 {
    match error {
        MidfileError::MissingConfig(_)
        | MidfileError::ConfigRead(_)
        | MidfileError::ConfigParse(_)
        | MidfileError::CatalogMissing(_) => 2,
        MidfileError::Cloud(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let loader = ConfigLoader::locate(cli.config.as_deref())?;

    match cli.command {
        Commands::Init(args) => {
            let result = init_catalog(&loader, &args.dbdir)?;
            emit(output_mode, &result, HumanOutput::print_init)
        }
        Commands::L2c(args) => {
            let config = loader.load()?;
            let cloud = S3CloudStore::from_config(config.cloud()?)?;
            let app = App::new(config, cloud);
            let result = app.local_to_cloud(
                args.bucket.as_deref(),
                &args.local_path,
                &args.cloud_path,
                sink(output_mode),
            )?;
            emit(output_mode, &result, HumanOutput::print_transfer)
        }
        Commands::C2l(args) => {
            let config = loader.load()?;
            let cloud = S3CloudStore::from_config(config.cloud()?)?;
            let app = App::new(config, cloud);
            let result = app.cloud_to_local(
                args.bucket.as_deref(),
                &args.cloud_path,
                &args.outpath,
                sink(output_mode),
            )?;
            emit(output_mode, &result, HumanOutput::print_transfer)
        }
        command => {
            let app = App::new(loader.load()?, NopCloud);
            run_catalog_command(command, &app, loader.path(), output_mode)
        }
    }
}

fn run_catalog_command<C: CloudStore>(
    command: Commands,
    app: &App<C>,
    config_path: &Utf8Path,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        Commands::Insert(args) => {
            let result = app.insert(NewFileRecord {
                pmid: args.subprojectid,
                product: args.product,
                sample: args.sample,
                ftype: args.ftype,
                fileformat: args.fileformat,
                filepath: args.filepath,
            })?;
            emit(output_mode, &result, HumanOutput::print_insert)
        }
        Commands::InsertRef(args) => {
            let result = app.insert_ref(
                &args.subprojectid,
                args.alignref.as_deref(),
                args.annoref.as_deref(),
            )?;
            emit(output_mode, &result, HumanOutput::print_insert_ref)
        }
        Commands::Update(args) => {
            let result = app.update(&args.filepath, &args.key, &args.value)?;
            emit(output_mode, &result, HumanOutput::print_update)
        }
        Commands::Check(args) => {
            let result = app.check(&args.filepath)?;
            emit(output_mode, &result, HumanOutput::print_check)
        }
        Commands::QueryFile(args) => {
            let mut conditions = QueryConditions::new();
            conditions.push_opt(Column::Pmid, args.subprojectid);
            conditions.push_opt(Column::Product, args.product);
            conditions.push_opt(Column::Sample, args.sample);
            conditions.push_opt(Column::Ftype, args.ftype);
            conditions.push_opt(Column::Fileformat, args.fileformat);
            conditions.push_opt(Column::Filepath, args.filepath);
            let result = app.query_files(&conditions, &args.outfile)?;
            emit(output_mode, &result, HumanOutput::print_export)
        }
        Commands::QueryRef(args) => {
            let result = app.query_refs(args.subprojectid.as_deref(), &args.outfile)?;
            emit(output_mode, &result, HumanOutput::print_export)
        }
        Commands::Info => {
            let result = app.info(config_path)?;
            emit(output_mode, &result, HumanOutput::print_info)
        }
        Commands::Init(_) | Commands::L2c(_) | Commands::C2l(_) => Err(miette::Report::msg(
            "command is not a catalog command",
        )),
    }
}

fn emit<T: Serialize>(output_mode: OutputMode, result: &T, human: fn(&T)) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print(result).into_diagnostic(),
        OutputMode::Human => {
            human(result);
            Ok(())
        }
    }
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &HumanOutput,
    }
}

/// Stand-in for commands that never touch object storage.
struct NopCloud;

impl CloudStore for NopCloud {
    fn exists(&self, _bucket: &str, _key: &str) -> Result<bool, MidfileError> {
        Err(MidfileError::Cloud("cloud client not configured".to_string()))
    }

    fn upload(&self, _bucket: &str, _local_path: &Utf8Path, _key: &str) -> Result<(), MidfileError> {
        Err(MidfileError::Cloud("cloud client not configured".to_string()))
    }

    fn download(
        &self,
        _bucket: &str,
        _key: &str,
        _destination: &Utf8Path,
    ) -> Result<(), MidfileError> {
        Err(MidfileError::Cloud("cloud client not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let path = Utf8PathBuf::from("/etc/midfile/midfile.yml");
        assert_eq!(map_exit_code(&MidfileError::EmptyField("pmid")), 1);
        assert_eq!(map_exit_code(&MidfileError::RecordNotFound("/x".into())), 1);
        assert_eq!(map_exit_code(&MidfileError::NoRecords), 1);
        assert_eq!(map_exit_code(&MidfileError::MissingConfig(path.clone())), 2);
        assert_eq!(map_exit_code(&MidfileError::ConfigRead(path.clone())), 2);
        assert_eq!(map_exit_code(&MidfileError::ConfigParse("bad".into())), 2);
        assert_eq!(map_exit_code(&MidfileError::CatalogMissing(path)), 2);
        assert_eq!(map_exit_code(&MidfileError::Cloud("timeout".into())), 3);
    }

    #[test]
    fn exit_code_survives_report_conversion() {
        let report: miette::Report = MidfileError::Cloud("timeout".into()).into();
        let err = report.downcast_ref::<MidfileError>().unwrap();
        assert_eq!(map_exit_code(err), 3);
    }
}
