//! Chat Relay CLI binary.
//!
//! Diagnostic reverse proxy for LLM chat-completion APIs.
//!
//! # Commands
//!
//! - `serve` - Start the proxy
//! - `pretty` - Pretty-print JSON without reordering keys

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use chat_relay::{config, pretty_print, ApiKey, Config, ProxyServer, VERSION};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(version = VERSION)]
#[command(about = "Chat Relay - Diagnostic streaming proxy for LLM chat-completion APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy
    Serve {
        /// Config file (default: <config_dir>/chat-relay/config.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Upstream chat-completions URL
        #[arg(short, long)]
        upstream: Option<String>,

        /// API key for upstream (or use env OPENAI_API_KEY)
        #[arg(short = 'k', long)]
        api_key: Option<String>,

        /// Print the concatenated response text after each stream
        #[arg(long)]
        accumulate_text: bool,

        /// Drop blank SSE lines instead of forwarding them
        #[arg(long)]
        drop_blank_lines: bool,

        /// Print chunks as received instead of pretty-printed
        #[arg(long)]
        raw: bool,

        /// Disable ANSI colors
        #[arg(long)]
        no_color: bool,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Pretty-print JSON, preserving key order
    Pretty {
        /// JSON input (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            host,
            upstream,
            api_key,
            accumulate_text,
            drop_blank_lines,
            raw,
            no_color,
            verbose,
        } => cmd_serve(ServeArgs {
            config,
            port,
            host,
            upstream,
            api_key,
            accumulate_text,
            drop_blank_lines,
            raw,
            no_color,
            verbose,
        }),

        Commands::Pretty { input, file } => cmd_pretty(input, file),
    }
}

struct ServeArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
    upstream: Option<String>,
    api_key: Option<String>,
    accumulate_text: bool,
    drop_blank_lines: bool,
    raw: bool,
    no_color: bool,
    verbose: bool,
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    // `.env` feeds both the CHAT_RELAY_* overrides and the API key
    config::load_dotenv(None);
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(port) = args.port {
        config.proxy.port = port;
    }
    if let Some(host) = args.host {
        config.proxy.host = host;
    }
    if let Some(upstream) = args.upstream {
        config.proxy.upstream_url = upstream;
    }
    if args.accumulate_text {
        config.diagnostics.accumulate_text = true;
    }
    if args.drop_blank_lines {
        config.diagnostics.preserve_blank_lines = false;
    }
    if args.raw {
        config.diagnostics.pretty_print = false;
    }
    if args.no_color || !io::stdout().is_terminal() {
        config.diagnostics.color = false;
    }

    // Missing key is fatal before anything binds
    let api_key = ApiKey::resolve(args.api_key)?;

    let server = ProxyServer::new(config, api_key)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { server.run().await.map_err(|e| anyhow::anyhow!("{}", e)) })
}

fn cmd_pretty(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    println!("{}", pretty_print(content.trim()));
    Ok(())
}

// Helper functions

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            Ok(s)
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
