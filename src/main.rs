mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semsql")]
#[command(about = "Hybrid relational + semantic index over SQLite", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Config file (default: ./semsql.yaml)")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Debug logging on stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or check) the configured table and its vector collection
    Init {
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Insert rows from a JSON array of objects
    Insert {
        #[arg(long, short, help = "JSON file with an array of row objects ('-' for stdin)")]
        file: PathBuf,
        #[arg(long, help = "Reject columns not declared in the table")]
        validate: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Split text into sentence chunks and insert one row per chunk
    #[command(name = "insert-text")]
    InsertText {
        #[arg(long, short, conflicts_with = "text", help = "Read text from a file")]
        file: Option<PathBuf>,
        #[arg(long, short, help = "Text to insert")]
        text: Option<String>,
        #[arg(long = "meta", short, value_name = "KEY=VALUE", help = "Column value copied to every chunk")]
        meta: Vec<String>,
        #[arg(long, help = "Sentences per chunk (default from config)")]
        max_sentences: Option<usize>,
        #[arg(long, help = "Reject columns not declared in the table")]
        validate: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Fetch rows by identity
    Get {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Semantic search, optionally restricted by an SQL predicate
    #[command(alias = "q")]
    Query {
        text: String,
        #[arg(long = "where", short, help = "SQL predicate over the table (trusted input)")]
        predicate: Option<String>,
        #[arg(long, short, help = "Limit results (default from config)")]
        limit: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Row and vector counts, plus identities missing from either store
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server over stdio
    #[cfg(feature = "mcp")]
    Mcp {
        #[arg(long, help = "Show client configuration instructions")]
        install: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Init { json } => commands::init::run(config, json),
        Commands::Insert {
            file,
            validate,
            json,
        } => commands::insert::run(config, &file, validate, json),
        Commands::InsertText {
            file,
            text,
            meta,
            max_sentences,
            validate,
            json,
        } => commands::insert_text::run(
            config,
            commands::insert_text::Source::from_args(file, text),
            &meta,
            max_sentences,
            validate,
            json,
        ),
        Commands::Get { ids, json } => commands::get::run(config, &ids, json),
        Commands::Query {
            text,
            predicate,
            limit,
            json,
        } => commands::query::run(config, &text, predicate.as_deref(), limit, json),
        Commands::Status { json } => commands::status::run(config, json),

        // MCP Server
        #[cfg(feature = "mcp")]
        Commands::Mcp { install } => {
            if install {
                print_mcp_install_instructions(config);
                Ok(())
            } else {
                run_mcp_server(config)
            }
        }
    }
}

/// Logs go to stderr; stdout carries command output and the MCP transport.
fn init_tracing(verbose: bool) {
    let default = if verbose { "semantic_sql=debug,semsql=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(feature = "mcp")]
fn run_mcp_server(config: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = commands::load_config(config)?;
    let index = commands::open_with(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(mcp::run_mcp_server(
        index,
        config.default_top_k,
        config.max_sentences_per_chunk,
    ))
}

#[cfg(feature = "mcp")]
fn print_mcp_install_instructions(config: Option<&std::path::Path>) {
    use colored::Colorize;

    let work_dir = std::env::current_dir()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "/path/to/your/project".to_string());

    let binary_path = std::env::current_exe()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "semsql".to_string());

    let args = match config {
        Some(path) => format!(r#"["--config", "{}", "mcp"]"#, path.display()),
        None => r#"["mcp"]"#.to_string(),
    };

    println!("{}", "MCP Server Installation Guide".bold().cyan());
    println!();
    println!("Add the following to your MCP client configuration:");
    println!();
    println!(r#"{{
  "mcpServers": {{
    "semsql": {{
      "command": "{}",
      "args": {},
      "cwd": "{}"
    }}
  }}
}}"#, binary_path, args, work_dir);
    println!();
    println!("{}", "Available tools:".bold());
    println!("  • {} - Semantic search filtered by an SQL predicate", "semsql_query".green());
    println!("  • {} - Fetch rows by identity", "semsql_get".green());
    println!("  • {} - Insert rows into both stores", "semsql_insert".green());
    println!("  • {} - Chunk text and insert one row per chunk", "semsql_insert_text".green());
    println!("  • {} - Row/vector counts and orphan report", "semsql_status".green());
}
