use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use ircsocial::config::get_config_dir;
use ircsocial::view::{CredentialView, CredentialViewProvider, ViewMessage};

use crate::utils;

// Terminal credential form, pre-filled from the last login

/// What the last successful prompt was answered with
#[derive(Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SavedLogin {
    pub user_id: String,
    pub host: String,
    #[serde(default)]
    pub port: String,
}

fn get_credentials_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("credentials.json"))
}

pub fn save_login(login: &SavedLogin) -> Result<()> {
    let path = get_credentials_path()?;
    let file = File::create(&path)?;
    serde_json::to_writer_pretty(file, login)?;

    info!("Login details saved for {}", login.user_id);
    Ok(())
}

pub fn load_login() -> Result<Option<SavedLogin>> {
    let path = get_credentials_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    let login: SavedLogin = serde_json::from_str(&contents)?;
    info!("Loaded login details for {} from {}", login.user_id, path.display());
    Ok(Some(login))
}

/// Opens a terminal prompt for every login attempt
pub struct TerminalViews;

impl CredentialViewProvider for TerminalViews {
    fn open(&self) -> Box<dyn CredentialView> {
        Box::new(TerminalView {
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct TerminalView {
    closed: Arc<AtomicBool>,
}

impl CredentialView for TerminalView {
    fn show(&mut self, form_id: &str) -> oneshot::Receiver<ViewMessage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let closed = self.closed.clone();
        let form_id = form_id.to_string();
        tokio::task::spawn_blocking(move || {
            let reply = match prompt(&form_id) {
                Ok(Some(reply)) => reply,
                // Input ended: drop the sender so the login counts as cancelled
                Ok(None) => return,
                Err(e) => {
                    error!("Credential prompt failed: {}", e);
                    ViewMessage::error()
                }
            };
            if !closed.load(Ordering::SeqCst) {
                let _ = reply_tx.send(reply);
            }
        });
        reply_rx
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Prompts for login details, preferring environment variables
fn prompt(form_id: &str) -> Result<Option<ViewMessage>> {
    let saved = load_login().unwrap_or_else(|e| {
        warn!("Ignoring unreadable saved login: {}", e);
        None
    });
    let saved = saved.unwrap_or_default();

    eprintln!("-- {} --", form_id);
    let answers = (
        field("IRC_NICK", "Nickname", &saved.user_id)?,
        field("IRC_HOST", "Server host", &saved.host)?,
        field("IRC_PORT", "Port (empty for default)", &saved.port)?,
    );
    let (user_id, host, port) = match answers {
        (Some(user_id), Some(host), Some(port)) => (user_id, host, port),
        _ => return Ok(None),
    };

    let login = SavedLogin {
        user_id: user_id.clone(),
        host: host.clone(),
        port: port.clone(),
    };
    if let Err(e) = save_login(&login) {
        warn!("Could not save login details: {}", e);
    }

    Ok(Some(ViewMessage::auth(&user_id, &host, &port)))
}

fn field(var: &str, label: &str, default: &str) -> Result<Option<String>> {
    if let Ok(value) = env::var(var) {
        return Ok(Some(value));
    }
    if default.is_empty() {
        eprint!("{}: ", label);
    } else {
        eprint!("{} [{}]: ", label, default);
    }
    Ok(utils::read_line()?.map(|answer| {
        if answer.is_empty() {
            default.to_string()
        } else {
            answer
        }
    }))
}
