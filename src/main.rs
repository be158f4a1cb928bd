/*!
 * Quasar - parallel CSV bulk import CLI
 *
 * Drives the import pipeline from the command line: give it a CSV file, a
 * target table name, a schema, and the designated timestamp column, and it
 * materializes a time-partitioned columnar table.
 */

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, Command};

use quasar::{
    config::{parse_delimiter, Atomicity, JobFile, PartitionBy},
    import_csv, logging, ImportJob, JobStatus, Schema,
};

fn main() -> Result<ExitCode> {
    let matches = Command::new("quasar")
        .version(quasar::VERSION)
        .about("Parallel CSV bulk import into a time-partitioned columnar table")
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .value_name("FILE")
                .help("Source CSV file")
                .required(true),
        )
        .arg(
            Arg::new("dest")
                .short('d')
                .long("dest")
                .value_name("DIR")
                .help("Database root directory (default: current directory)"),
        )
        .arg(
            Arg::new("table")
                .short('t')
                .long("table")
                .value_name("NAME")
                .help("Destination table name")
                .required(true),
        )
        .arg(
            Arg::new("schema")
                .long("schema")
                .value_name("SPEC")
                .help("Column list, e.g. 'id:symbol:index(256),temp:double,ts:timestamp'")
                .required(true),
        )
        .arg(
            Arg::new("timestamp")
                .long("timestamp")
                .value_name("COLUMN")
                .help("Designated timestamp column name")
                .required(true),
        )
        .arg(
            Arg::new("partition-by")
                .long("partition-by")
                .value_name("UNIT")
                .help("Partitioning scheme: none, hour, day, month, year"),
        )
        .arg(
            Arg::new("atomicity")
                .long("atomicity")
                .value_name("MODE")
                .help("Parse error policy: skip_column, skip_row, skip_all"),
        )
        .arg(
            Arg::new("delimiter")
                .long("delimiter")
                .value_name("CHAR")
                .help("Column delimiter byte (default: ',')"),
        )
        .arg(
            Arg::new("header")
                .long("header")
                .help("Discard the first line of the file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("COUNT")
                .help("Worker threads (default: detected parallelism)"),
        )
        .arg(
            Arg::new("buffer-len")
                .long("buffer-len")
                .value_name("BYTES")
                .help("Per-task read buffer size"),
        )
        .arg(
            Arg::new("index-capacity")
                .long("index-capacity")
                .value_name("N")
                .help("Default value-block capacity for indexed columns (power of two)"),
        )
        .arg(
            Arg::new("keep-artifacts")
                .long("keep-artifacts")
                .help("Keep scratch files and shadow tables after a failed import")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Write JSON logs to a file instead of stdout"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML settings file; command-line flags win"),
        )
        .get_matches();

    let schema_text = matches.get_one::<String>("schema").expect("required arg");
    let schema = Schema::parse(schema_text).context("invalid schema")?;

    let ts_name = matches.get_one::<String>("timestamp").expect("required arg");
    let timestamp_index = schema
        .column_index(ts_name)
        .with_context(|| format!("timestamp column '{}' is not in the schema", ts_name))?;

    let source = PathBuf::from(matches.get_one::<String>("source").expect("required arg"));
    let dest = matches
        .get_one::<String>("dest")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let table = matches.get_one::<String>("table").expect("required arg");

    let mut job = ImportJob::new(source, dest, table.clone(), schema, timestamp_index);

    // Settings file first; explicit flags override it below
    if let Some(config_path) = matches.get_one::<String>("config") {
        let file = JobFile::load(&PathBuf::from(config_path))
            .with_context(|| format!("failed to load {}", config_path))?;
        file.apply(&mut job).context("invalid settings file")?;
    }

    if let Some(p) = matches.get_one::<String>("partition-by") {
        job.partition_by = PartitionBy::parse(p)?;
    }
    if let Some(a) = matches.get_one::<String>("atomicity") {
        job.atomicity = Atomicity::parse(a)?;
    }
    if let Some(d) = matches.get_one::<String>("delimiter") {
        job.delimiter = parse_delimiter(d)?;
    }
    if matches.get_flag("header") {
        job.ignore_header = true;
    }
    if let Some(w) = matches.get_one::<String>("workers") {
        job.worker_count = w.parse().context("invalid worker count")?;
    }
    if let Some(b) = matches.get_one::<String>("buffer-len") {
        job.buffer_len = b.parse().context("invalid buffer length")?;
    }
    if let Some(n) = matches.get_one::<String>("index-capacity") {
        job.index_value_block_capacity = n.parse().context("invalid index capacity")?;
    }
    if matches.get_flag("keep-artifacts") {
        job.keep_artifacts = true;
    }
    if let Some(f) = matches.get_one::<String>("log-file") {
        job.log_file = Some(PathBuf::from(f));
    }

    logging::init_logging(&job)?;

    let result = import_csv(&job)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    match result.status {
        JobStatus::Ok => Ok(ExitCode::SUCCESS),
        JobStatus::Cancelled => Ok(ExitCode::from(2)),
        JobStatus::Failed { reason } => bail!("import failed: {}", reason),
    }
}
