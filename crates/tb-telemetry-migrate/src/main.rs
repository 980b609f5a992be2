//! ThingsBoard Telemetry Migration CLI
//!
//! Exports device telemetry to a CSV file and imports it back, possibly into
//! another ThingsBoard instance or tenant.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tb_telemetry_migrate::{
    DeviceResolver, ExportRequest, Exporter, Importer, MigrationConfig, RetryPolicy,
    ThingsboardClient, TransferStats,
};

#[derive(Parser)]
#[command(name = "tb-telemetry-migrate")]
#[command(version)]
#[command(about = "Export and import ThingsBoard device telemetry", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (YAML); command-line values take precedence
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export device telemetry to a file
    Export(ExportArgs),

    /// Import telemetry from a file
    Import(ImportArgs),
}

#[derive(Args)]
struct ConnectionArgs {
    /// ThingsBoard base URL, e.g. https://thingsboard.example.com
    #[arg(long, env = "TB_HOST")]
    host: Option<String>,

    /// Tenant user name
    #[arg(long, env = "TB_USERNAME")]
    username: Option<String>,

    /// Tenant password
    #[arg(long, env = "TB_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl ConnectionArgs {
    fn apply(self, config: &mut MigrationConfig) {
        if let Some(host) = self.host {
            config.connection.host = host;
        }
        if let Some(username) = self.username {
            config.connection.username = username;
        }
        if let Some(password) = self.password {
            config.connection.password = password;
        }
    }
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Output file
    #[arg(long = "fileName", value_name = "FILE")]
    file_name: PathBuf,

    /// Range start, epoch milliseconds (inclusive)
    #[arg(long = "startTs", allow_negative_numbers = true)]
    start_ts: i64,

    /// Range end, epoch milliseconds (exclusive)
    #[arg(long = "endTs", allow_negative_numbers = true)]
    end_ts: i64,

    /// Comma-separated device names
    #[arg(long = "deviceNames", value_delimiter = ',', required = true)]
    device_names: Vec<String>,

    /// Comma-separated telemetry keys [default: every key of each device]
    #[arg(long, value_delimiter = ',')]
    keys: Option<Vec<String>>,

    /// Maximum records per request [default: 1024]
    #[arg(long = "chunkLimit")]
    chunk_limit: Option<usize>,

    /// Window length in minutes [default: 60]
    #[arg(long = "timeLimit")]
    time_limit: Option<u32>,
}

#[derive(Args)]
struct ImportArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Input file
    #[arg(long = "fileName", value_name = "FILE")]
    file_name: PathBuf,

    /// Maximum entries per write request [default: 1024]
    #[arg(long = "batchSize")]
    batch_size: Option<usize>,

    /// Parse and group the file without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose {
        "tb_telemetry_migrate=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            MigrationConfig::from_file(path)?
        }
        None => MigrationConfig::default(),
    };

    match cli.command {
        Commands::Export(args) => run_export(config, args).await,
        Commands::Import(args) => run_import(config, args).await,
    }
}

/// Builds the client and logs in, retrying transient failures.
async fn connect(config: &MigrationConfig, retry: &RetryPolicy) -> anyhow::Result<ThingsboardClient> {
    let client = ThingsboardClient::new(&config.connection)?
        .with_strict_data_types(config.export.strict_data_types);
    retry.run("login", || client.login()).await?;
    Ok(client)
}

async fn run_export(mut config: MigrationConfig, args: ExportArgs) -> anyhow::Result<()> {
    args.connection.apply(&mut config);
    if let Some(chunk_limit) = args.chunk_limit {
        config.export.chunk_limit = chunk_limit;
    }
    if let Some(time_limit) = args.time_limit {
        config.export.time_limit_minutes = time_limit;
    }
    config.validate()?;

    let request = ExportRequest {
        device_names: args.device_names,
        keys: args.keys,
        start_ts: args.start_ts,
        end_ts: args.end_ts,
    };
    request.validate()?;

    let retry = config.retry.to_policy();
    let client = connect(&config, &retry).await?;

    let mut resolver = DeviceResolver::new(&client, retry.clone());
    let exporter = Exporter::new(&client, retry, config.export.clone())
        .with_progress(std::io::stderr().is_terminal());
    let stats = exporter
        .export_to_file(&mut resolver, &request, &args.file_name)
        .await?;

    println!("\n✅ Export Complete!");
    println!("   File:       {}", args.file_name.display());
    println!("   Devices:    {}", stats.devices);
    println!("   Windows:    {}", stats.windows);
    println!("   Requests:   {}", stats.chunks);
    print_totals(&stats);

    Ok(())
}

async fn run_import(mut config: MigrationConfig, args: ImportArgs) -> anyhow::Result<()> {
    args.connection.apply(&mut config);
    if let Some(batch_size) = args.batch_size {
        config.import.batch_size = batch_size;
    }
    if args.dry_run {
        config.import.dry_run = true;
    }
    config.validate()?;

    let retry = config.retry.to_policy();
    let client = if config.import.dry_run {
        ThingsboardClient::new(&config.connection)?
    } else {
        connect(&config, &retry).await?
    };

    let mut resolver = DeviceResolver::new(&client, retry.clone());
    let importer = Importer::new(&client, retry, config.import.clone())
        .with_progress(std::io::stderr().is_terminal());
    let stats = importer.import_file(&mut resolver, &args.file_name).await?;

    if config.import.dry_run {
        println!("\n✅ Dry Run Complete! Nothing was written.");
    } else {
        println!("\n✅ Import Complete!");
    }
    println!("   File:       {}", args.file_name.display());
    println!("   Devices:    {}", stats.devices);
    println!("   Batches:    {}", stats.batches);
    print_totals(&stats);

    Ok(())
}

fn print_totals(stats: &TransferStats) {
    println!("   Records:    {}", stats.records);
    println!("   Duration:   {:.2}s", stats.duration_secs);
    println!("   Throughput: {:.0} records/sec", stats.throughput());
}
