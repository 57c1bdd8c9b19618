mod analytics;
mod app;
mod assistant;
mod auth;
mod error;
mod log_store;
mod mail_reader;
mod notifier;
mod pipeline;
mod settings;
mod web;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use log::{info, LevelFilter};

use crate::app::App;
use crate::auth::AuthStore;
use crate::mail_reader::encryption::{self, SecretStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gmail automation and analytics dashboard")]
struct Args {
    /// Path of the YAML settings file
    #[arg(short, long, default_value = settings::DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dashboard web server
    Serve,
    /// Fetch and process unread mail once, then exit
    Fetch,
    /// Encrypt and store the Gmail app password
    StorePassword,
    /// Replace the dashboard PIN
    SetPin { pin: String },
}

fn setup_logging(debug: bool) -> Result<()> {
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("async_imap", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

async fn build_app(config: settings::Config) -> Result<App> {
    let credentials = encryption::get_credentials(&config)?;
    App::new(config, credentials).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.debug)?;

    let config = settings::load_settings(&args.config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = build_app(config).await?;
            web::start_web_server(app).await
        }
        Command::Fetch => {
            let app = build_app(config).await?;
            let report = pipeline::process_unread(&app).await?;
            mail_reader::display::display_records(&report.records);
            info!(
                "{} unread, {} logged, {} duplicates",
                report.fetched,
                report.records.len(),
                report.duplicates
            );
            Ok(())
        }
        Command::StorePassword => {
            let store = SecretStore::new(&config.storage.secret_dir);
            encryption::prompt_and_store(&store)?;
            Ok(())
        }
        Command::SetPin { pin } => {
            let auth = AuthStore::open(
                config.storage.auth_file.clone(),
                &config.auth.default_pin,
                config.auth.otp_ttl_secs,
            )
            .await?;
            auth.set_pin(&pin).await?;
            info!("PIN updated");
            Ok(())
        }
    }
}
