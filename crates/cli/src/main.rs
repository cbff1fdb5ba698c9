mod commands;
mod logging;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use dune_interchange::{Network, QueryParameter};

use crate::commands::Context;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Run queries and manage dashboards on the Dune analytics service.
#[derive(Parser)]
#[command(
    name = "dune",
    version,
    about = "Run queries and manage dashboards on the Dune analytics service"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log requests and job phases to stderr (overridden by DUNE_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// TOML file with endpoint and polling settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upsert, execute and wait for a query, then print its records
    Fetch {
        /// File holding the query SQL
        #[arg(long)]
        sql: PathBuf,
        /// Identifier of an existing query to overwrite (default: DUNE_QUERY_ID)
        #[arg(long)]
        query_id: Option<u64>,
        /// Query name (default: the SQL file's stem)
        #[arg(long)]
        name: Option<String>,
        /// Dataset to run against
        #[arg(long, default_value = "mainnet")]
        network: Network,
        /// Parameter binding as KEY:TYPE=VALUE (TYPE is text, number or datetime)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<QueryParameter>,
    },

    /// Inspect, refresh and export dashboards
    Dashboard {
        #[command(subcommand)]
        command: DashboardCommands,
    },
}

#[derive(Subcommand)]
enum DashboardCommands {
    /// Print a dashboard and the links of its queries
    Show {
        /// Path to the dashboard JSON document
        config: PathBuf,
    },
    /// Upsert and execute every query of a dashboard
    Refresh {
        /// Path to the dashboard JSON document
        config: PathBuf,
    },
    /// Write one SQL file per query plus a manifest
    Export {
        /// Path to the dashboard JSON document
        config: PathBuf,
        /// Target directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Download a published dashboard and export it
    Pull {
        /// Account owning the dashboard
        #[arg(long)]
        owner: String,
        /// Dashboard slug
        #[arg(long)]
        slug: String,
        /// Target directory
        #[arg(long)]
        out: PathBuf,
    },
}

/// `KEY:TYPE=VALUE` → typed parameter.
fn parse_param(raw: &str) -> Result<QueryParameter, String> {
    let (binding, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY:TYPE=VALUE, got '{}'", raw))?;
    let (key, kind) = binding
        .split_once(':')
        .ok_or_else(|| format!("expected KEY:TYPE=VALUE, got '{}'", raw))?;
    let kind = kind.parse().map_err(|e| format!("{}", e))?;
    QueryParameter::parse(key, kind, &serde_json::Value::String(value.to_string()))
        .map_err(|e| e.to_string())
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let ctx = Context {
        output: cli.output,
        quiet: cli.quiet,
        config: cli.config,
    };

    let result = match cli.command {
        Commands::Fetch {
            sql,
            query_id,
            name,
            network,
            params,
        } => commands::fetch::cmd_fetch(&ctx, &sql, query_id, name, network, params),
        Commands::Dashboard { command } => match command {
            DashboardCommands::Show { config } => commands::dashboard::cmd_show(&ctx, &config),
            DashboardCommands::Refresh { config } => {
                commands::dashboard::cmd_refresh(&ctx, &config)
            }
            DashboardCommands::Export { config, out } => {
                commands::dashboard::cmd_export(&ctx, &config, &out)
            }
            DashboardCommands::Pull { owner, slug, out } => {
                commands::dashboard::cmd_pull(&ctx, &owner, &slug, &out)
            }
        },
    };

    if let Err(e) = result {
        report_error(&format!("error: {}", e), ctx.output, ctx.quiet);
        process::exit(1);
    }
}

/// Print an error message to stderr in the requested format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
