use std::sync::Arc;

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use httplistener::{
    ExecutionContext, HttpListener,
    config::{ListenerOptions, OptionsValidator, load_options, load_options_from_env},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Optional options file; environment variables take precedence
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate listener options and print a summary
    Validate,
    /// Start the listener (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let options = load(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_command(&options),
        Commands::Serve => serve_command(options).await,
    }
}

fn load(config_path: Option<&str>) -> Result<ListenerOptions> {
    match config_path {
        Some(path) => load_options(path),
        None => load_options_from_env(),
    }
}

async fn serve_command(options: ListenerOptions) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            A provider was probably installed already.",
            e
        );
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    if let Err(e) = OptionsValidator::validate(&options) {
        tracing::warn!("{}", e);
    }

    let context = Arc::new(ExecutionContext::new());
    let mut listener = HttpListener::new(options, context);
    listener
        .add_health_check()?
        .add_logger()?
        .add_json_content()?;

    listener.start().await.context("Listener failed")?;
    tracing::info!("Listener stopped");
    Ok(())
}

fn validate_command(options: &ListenerOptions) -> Result<()> {
    println!("🔍 Validating listener options");

    match OptionsValidator::validate(options) {
        Ok(()) => {
            println!("✅ Options validation: OK");
            println!();
            println!("📋 Options Summary:");
            println!("   • HTTP: {}:{}", options.bind_address, options.http_port);
            if options.enable_tls {
                println!("   • HTTPS: {}:{}", options.bind_address, options.tls_port);
            } else {
                println!("   • HTTPS: disabled");
            }
            println!(
                "   • API Prefix: {}",
                if options.api_prefix.is_empty() {
                    "/"
                } else {
                    options.api_prefix.as_str()
                }
            );
            println!("   • Database: {}", options.database_name);
            println!("   • Log Health Checks: {}", options.log_health_checks);
            println!("   • Shutdown Grace: {}s", options.shutdown_timeout_secs);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Options validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
