use std::path::PathBuf;

use clap::{Parser, Subcommand};

use heatloop_lib::config::{load_config, save_config, AppConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config.toml to use instead of the default lookup.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the turn loop (default).
    Run,
    /// Act as a remote compositor for a running session.
    Compositor {
        /// Control socket of the session, e.g. ws://127.0.0.1:1236
        #[arg(long)]
        connect: String,
    },
    /// Write a config.toml with every default filled in.
    InitConfig {
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    heatloop_lib::init_tracing();

    let args = Args::parse();
    if let Some(Command::InitConfig { path }) = &args.command {
        if let Err(e) = save_config(&AppConfig::default(), path) {
            tracing::error!(error = %e, "failed to write config");
            std::process::exit(1);
        }
        return;
    }

    let config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(2);
        }
    };

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => heatloop_lib::run(config).await,
        Command::Compositor { connect } => heatloop_lib::run_remote_compositor(&connect, config).await,
        Command::InitConfig { .. } => Ok(()),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "heatloop exited with error");
        std::process::exit(1);
    }
}
