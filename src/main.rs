use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

mod credentials;
mod utils;

use crate::credentials::TerminalViews;
use ircsocial::config::set_config_path_override;
use ircsocial::irc::TcpTransport;
use ircsocial::{AdapterConfig, ContactStatus, IrcSocialProvider, LoginOptions, SocialEvent};

/// Command line arguments for ircsocial
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "ircsocial: presence and direct messages between IRC users.",
    long_about = "ircsocial logs into an IRC server, tracks who is around in a shared channel and \
    exchanges batched direct messages with them.\n\n\
    Credentials are read from IRC_NICK, IRC_HOST and IRC_PORT, or prompted for.\n\
    Use -h or --help to see all options."
)]
struct Args {
    /// Config file to use instead of the one in the config directory
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Channel to join when the login names none
    #[arg(long)]
    channel: Option<String>,

    /// Server host used when the credential form leaves it empty
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_file = args.log_file.as_ref().map(|path| path.display().to_string());
    // Debug output would drown the prompt on stderr
    let level = if log_file.is_some() { LevelFilter::Debug } else { LevelFilter::Warn };
    utils::setup_logging(log_file.as_deref(), level)?;

    if let Some(path) = args.config {
        set_config_path_override(path)?;
    }
    let mut config = AdapterConfig::load()?;
    if let Some(channel) = args.channel {
        config.default_channel = channel;
    }

    let options = LoginOptions {
        agent: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: args.host,
        ..Default::default()
    };

    let (provider, mut events) = IrcSocialProvider::spawn(
        config,
        Arc::new(TcpTransport::new()),
        Arc::new(TerminalViews),
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    login(&provider, Some(options)).await;
    eprintln!("Type /help for commands.");

    let result = run_main_loop(&provider).await;

    if let Err(e) = provider.logout().await {
        error!("Logout failed: {}", e);
    }
    info!("Exiting");
    result
}

fn print_event(event: &SocialEvent) {
    match event {
        SocialEvent::ClientState(record) => {
            let status = match record.status {
                ContactStatus::Online => "online",
                ContactStatus::OnlineWithOtherApp => "online (other client)",
                ContactStatus::Offline => "offline",
                ContactStatus::Unknown => "unknown",
            };
            println!("* {} is {}", record.display_name, status);
        }
        SocialEvent::Message(message) => {
            println!(
                "[{}] <{}> {}",
                message.received_at.format("%H:%M:%S"),
                message.from.display_name,
                message.message
            );
        }
    }
}

async fn login(provider: &IrcSocialProvider, options: Option<LoginOptions>) {
    match provider.login(options).await {
        Ok(me) => println!("Logged in as {}", me.user_id),
        Err(e) => eprintln!("Login failed: {} ({})", e, e.errcode.description()),
    }
}

async fn run_main_loop(provider: &IrcSocialProvider) -> Result<()> {
    loop {
        let line = match tokio::task::spawn_blocking(utils::read_line).await?? {
            Some(line) => line,
            None => return Ok(()),
        };
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(3, ' ');
        match parts.next().unwrap_or_default() {
            "/quit" => return Ok(()),
            "/help" => {
                eprintln!("/msg <nick> <text>  send a direct message");
                eprintln!("/contacts           list known contacts");
                eprintln!("/login              log in again");
                eprintln!("/logout             log out");
                eprintln!("/forget             forget cached credentials");
                eprintln!("/quit               log out and exit");
            }
            "/msg" => match (parts.next(), parts.next()) {
                (Some(to), Some(text)) => {
                    if let Err(e) = provider.send_message(to, text).await {
                        eprintln!("Message not sent: {}", e);
                    }
                }
                _ => eprintln!("Usage: /msg <nick> <text>"),
            },
            "/contacts" => match provider.get_contacts().await {
                Ok(contacts) => {
                    let mut records: Vec<_> = contacts.into_values().collect();
                    records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                    if records.is_empty() {
                        eprintln!("No contacts yet");
                    }
                    for record in records {
                        let seen = record
                            .last_seen
                            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "never".to_string());
                        let status = format!("{:?}", record.status);
                        println!("{:<20} {:<20} last seen {}", record.user_id, status, seen);
                    }
                }
                Err(e) => eprintln!("Could not list contacts: {}", e),
            },
            "/login" => login(provider, None).await,
            "/logout" => match provider.logout().await {
                Ok(()) => println!("Logged out"),
                Err(e) => eprintln!("Logout failed: {}", e),
            },
            "/forget" => match provider.clear_cached_credentials().await {
                Ok(()) => println!("Cached credentials cleared"),
                Err(e) => eprintln!("Could not clear credentials: {}", e),
            },
            other => eprintln!("Unknown command '{}', try /help", other),
        }
    }
}
