use anyhow::{Context, Result, bail};
use clap::Parser;
use rollsink::retry::ignore_teardown_error;
use rollsink::{
    DelimitedLineSource, JobConfig, JobSettings, LocalTransport, Protocol, RecordSource,
    TaskReport, Transport, VecSource, WriterSettings, prepare, run_task, split,
};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::info;

/// Write delimited records from stdin into rolling, atomically published files
#[derive(Parser)]
#[command(name = "rollsink")]
#[command(version)]
#[command(about = "Write delimited records from stdin into rolling, atomically published files", long_about = None)]
struct Cli {
    /// Path to the JSON job configuration
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Number of writer instances to split the input across
    #[arg(short, long, value_name = "N", default_value_t = 1)]
    tasks: usize,

    /// Field delimiter of the input (defaults to the job's fieldDelimiter)
    #[arg(short = 'd', long, value_name = "CHAR")]
    input_delimiter: Option<char>,

    /// Log level: trace, debug, info, warn, error (overrides RUST_LOG)
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let settings = JobConfig::from_path(&cli.config)
        .and_then(|cfg| cfg.validate())
        .with_context(|| format!("Failed to load job from {}", cli.config.display()))?;
    if cli.tasks == 0 {
        bail!("--tasks must be at least 1");
    }
    let delimiter = cli.input_delimiter.unwrap_or(settings.field_delimiter);

    let reports = match settings.session.as_ref().map(|s| s.protocol) {
        None => execute(&settings, cli.tasks, delimiter, || Ok(LocalTransport::new()))?,
        Some(Protocol::Ftp) => run_ftp(&settings, cli.tasks, delimiter)?,
        Some(Protocol::Sftp) => run_sftp(&settings, cli.tasks, delimiter)?,
    };

    for report in &reports {
        println!(
            "{}: {} rows in {} files",
            report.prefix,
            report.rows,
            report.files.len()
        );
        for file in &report.files {
            println!("  {file}");
        }
    }
    Ok(())
}

/// Log to stderr, filtered by `--log-level`, then `RUST_LOG`, then `info`.
fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(feature = "ftp")]
fn run_ftp(settings: &JobSettings, tasks: usize, delimiter: char) -> Result<Vec<TaskReport>> {
    let session = settings
        .session
        .as_ref()
        .context("ftp job without session settings")?;
    let retry = rollsink::RetryConfig::default();
    execute(settings, tasks, delimiter, || {
        rollsink::connect_ftp(session, &retry)
    })
}

#[cfg(not(feature = "ftp"))]
fn run_ftp(_: &JobSettings, _: usize, _: char) -> Result<Vec<TaskReport>> {
    bail!("rollsink was built without the `ftp` feature")
}

#[cfg(feature = "sftp")]
fn run_sftp(settings: &JobSettings, tasks: usize, delimiter: char) -> Result<Vec<TaskReport>> {
    let session = settings
        .session
        .as_ref()
        .context("sftp job without session settings")?;
    let retry = rollsink::RetryConfig::default();
    execute(settings, tasks, delimiter, || {
        rollsink::connect_sftp(session, &retry)
    })
}

#[cfg(not(feature = "sftp"))]
fn run_sftp(_: &JobSettings, _: usize, _: char) -> Result<Vec<TaskReport>> {
    bail!("rollsink was built without the `sftp` feature")
}

/// Prepare the destination, then write stdin through `tasks` writer instances.
fn execute<T, F>(
    settings: &JobSettings,
    tasks: usize,
    delimiter: char,
    connect: F,
) -> Result<Vec<TaskReport>>
where
    T: Transport,
    F: Fn() -> rollsink::Result<T> + Sync,
{
    let mut setup = connect().context("Failed to connect")?;
    prepare(&mut setup, settings).context("Failed to prepare destination")?;
    let prefixes = split(&mut setup, settings, tasks).context("Failed to split job")?;
    ignore_teardown_error("logout", || setup.logout());

    let stdin = std::io::stdin();
    if let [prefix] = prefixes.as_slice() {
        let mut source = DelimitedLineSource::new(stdin.lock(), delimiter);
        let report = run_task(
            connect().context("Failed to connect")?,
            WriterSettings::for_instance(settings, prefix.clone()),
            &mut source,
        )?;
        return Ok(vec![report]);
    }

    let sources = distribute(stdin.lock(), delimiter, prefixes.len())?;
    info!(tasks = prefixes.len(), "writing input across instances");
    run_all(settings, prefixes, sources, connect)
}

/// Deal input records round-robin into `n` in-memory sources.
fn distribute(input: impl BufRead, delimiter: char, n: usize) -> Result<Vec<VecSource>> {
    let mut lines = DelimitedLineSource::new(input, delimiter);
    let mut buckets: Vec<Vec<Vec<String>>> = vec![Vec::new(); n];
    let mut i = 0;
    while let Some(record) = lines.next_record()? {
        buckets[i % n].push(record);
        i += 1;
    }
    Ok(buckets.into_iter().map(VecSource::new).collect())
}

#[cfg(feature = "parallel-io")]
fn run_all<T, F>(
    settings: &JobSettings,
    prefixes: Vec<String>,
    sources: Vec<VecSource>,
    connect: F,
) -> Result<Vec<TaskReport>>
where
    T: Transport,
    F: Fn() -> rollsink::Result<T> + Sync,
{
    Ok(rollsink::run_parallel(settings, prefixes, sources, connect)?)
}

#[cfg(not(feature = "parallel-io"))]
fn run_all<T, F>(
    settings: &JobSettings,
    prefixes: Vec<String>,
    sources: Vec<VecSource>,
    connect: F,
) -> Result<Vec<TaskReport>>
where
    T: Transport,
    F: Fn() -> rollsink::Result<T> + Sync,
{
    prefixes
        .into_iter()
        .zip(sources)
        .map(|(prefix, mut source)| {
            let report = run_task(
                connect()?,
                WriterSettings::for_instance(settings, prefix),
                &mut source,
            )?;
            Ok(report)
        })
        .collect()
}
