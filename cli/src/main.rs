use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use switchboard_core::directory::ContactDirectory;
use switchboard_core::{
    load_app_config, AppAction, Backend, ConsoleError, ConversationKey, DeliveryState, Direction,
    FfiApp, HttpBackend, Platform,
};

#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(about = "Operator console CLI: identity checks, directory dumps, live conversations")]
struct Cli {
    /// Data directory (config + logs live here)
    #[arg(long, default_value = ".switchboard")]
    state_dir: PathBuf,

    /// Backend base URL
    #[arg(long, env = "SWITCHBOARD_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long, env = "SWITCHBOARD_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the canonical identity of each raw identifier
    Canonicalize {
        /// Raw identifiers, e.g. 201001234567@s.whatsapp.net
        #[arg(required = true)]
        raw: Vec<String>,
    },

    /// Fetch the contact directory and print the visible list
    Contacts,

    /// Open a conversation and stream its log
    Watch {
        #[arg(long, value_parser = parse_platform, default_value = "whatsapp")]
        platform: Platform,

        /// Contact identifier in any supported form
        #[arg(long)]
        contact: String,

        /// Stop after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Send a text message and wait for the server copy
    Send {
        #[arg(long, value_parser = parse_platform, default_value = "whatsapp")]
        platform: Platform,

        #[arg(long)]
        contact: String,

        #[arg(long)]
        content: String,

        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

fn parse_platform(s: &str) -> Result<Platform, String> {
    Platform::parse(s).ok_or_else(|| format!("unknown platform {s:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("create state dir {}", cli.state_dir.display()))?;

    match &cli.cmd {
        Command::Canonicalize { raw } => cmd_canonicalize(&cli, raw),
        Command::Contacts => cmd_contacts(&cli).await,
        Command::Watch {
            platform,
            contact,
            timeout,
        } => cmd_watch(&cli, *platform, contact, *timeout).await,
        Command::Send {
            platform,
            contact,
            content,
            timeout,
        } => cmd_send(&cli, *platform, contact, content, *timeout).await,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn print(v: serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(&v).expect("json encode"));
}

/// Only a send failure ends `send`; fetch trouble is left to the poller.
fn send_failure(toast: Option<String>) -> Option<String> {
    toast.filter(|t| t.starts_with("Message not sent"))
}

fn state_dir_str(cli: &Cli) -> String {
    cli.state_dir.to_string_lossy().into_owned()
}

fn backend(cli: &Cli) -> anyhow::Result<HttpBackend> {
    let config = load_app_config(&state_dir_str(cli));
    let base_url = cli
        .base_url
        .clone()
        .or_else(|| config.base_url())
        .ok_or_else(|| anyhow!("no backend: pass --base-url or set SWITCHBOARD_BASE_URL"))?;
    let token = cli.api_token.clone().or_else(|| config.api_token());
    HttpBackend::new(&base_url, token, config.request_timeout())
        .with_context(|| format!("backend at {base_url}"))
}

fn conversation_key(cli: &Cli, platform: Platform, contact: &str) -> ConversationKey {
    let canon = load_app_config(&state_dir_str(cli)).canonicalizer();
    let id = canon.canonicalize_for(platform, contact);
    ConversationKey::new(platform, id.key)
}

fn start_app(cli: &Cli) -> anyhow::Result<Arc<FfiApp>> {
    let backend: Arc<dyn Backend> = Arc::new(backend(cli)?);
    Ok(FfiApp::with_backend(state_dir_str(cli), backend))
}

// ── Commands ────────────────────────────────────────────────────────────────

fn cmd_canonicalize(cli: &Cli, raw: &[String]) -> anyhow::Result<()> {
    let canon = load_app_config(&state_dir_str(cli)).canonicalizer();
    let out: Vec<serde_json::Value> = raw
        .iter()
        .map(|r| {
            let id = canon.canonicalize(r);
            let noise = canon.is_noise(&id.key, id.is_opaque);
            if id.is_opaque {
                eprintln!("{}", ConsoleError::IdentityAmbiguous { raw: r.clone() });
            }
            json!({
                "raw": r,
                "key": id.key,
                "display_form": id.display_form,
                "is_opaque": id.is_opaque,
                "hidden": noise,
            })
        })
        .collect();
    print(json!(out));
    Ok(())
}

async fn cmd_contacts(cli: &Cli) -> anyhow::Result<()> {
    let backend = backend(cli)?;
    let entries = backend.fetch_contacts().await.context("fetch contacts")?;
    let canon = load_app_config(&state_dir_str(cli)).canonicalizer();
    let mut directory = ContactDirectory::new(canon);
    directory.rebuild(&entries);
    let visible = directory.visible();
    eprintln!(
        "{} entries, {} contacts, {} visible",
        entries.len(),
        directory.len(),
        visible.len()
    );
    print(json!(visible));
    Ok(())
}

async fn cmd_watch(
    cli: &Cli,
    platform: Platform,
    contact: &str,
    timeout_sec: u64,
) -> anyhow::Result<()> {
    let key = conversation_key(cli, platform, contact);
    let app = start_app(cli)?;
    app.dispatch(AppAction::SelectConversation { key: key.clone() });
    eprintln!("watching {key} for {timeout_sec}s");

    let deadline = Instant::now() + Duration::from_secs(timeout_sec);
    let mut printed: HashSet<(String, bool)> = HashSet::new();
    while Instant::now() < deadline {
        for m in app.visible_log(key.clone()) {
            let pending = m.delivery == DeliveryState::Pending;
            if printed.insert((m.id.clone(), pending)) {
                println!("{}", serde_json::to_string(&m)?);
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    app.dispatch(AppAction::CloseConversation);
    Ok(())
}

async fn cmd_send(
    cli: &Cli,
    platform: Platform,
    contact: &str,
    content: &str,
    timeout_sec: u64,
) -> anyhow::Result<()> {
    let key = conversation_key(cli, platform, contact);
    let app = start_app(cli)?;
    app.dispatch(AppAction::SelectConversation { key: key.clone() });
    app.dispatch(AppAction::SendMessage {
        key: key.clone(),
        content: content.to_string(),
    });

    let deadline = Instant::now() + Duration::from_secs(timeout_sec);
    let mut seen_pending = false;
    while Instant::now() < deadline {
        let state = app.state();
        if let Some(toast) = send_failure(state.toast) {
            bail!("{toast}");
        }
        let log = app.visible_log(key.clone());
        let pending = log
            .iter()
            .any(|m| m.delivery == DeliveryState::Pending);
        seen_pending |= pending || state.busy.sending > 0;
        if seen_pending && !pending && state.busy.sending == 0 {
            let sent = log
                .iter()
                .rev()
                .find(|m| m.direction == Direction::Outgoing && m.content == content);
            print(json!({ "conversation": key.to_string(), "message": sent }));
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    bail!("timed out waiting for the server copy after {timeout_sec}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_toasts_do_not_abort_a_send() {
        assert_eq!(
            send_failure(Some("Connection problems, retrying in the background".into())),
            None
        );
        assert_eq!(
            send_failure(Some("Could not load conversations: bad token".into())),
            None
        );
        assert_eq!(
            send_failure(Some("Message not sent: 24h window closed".into())).as_deref(),
            Some("Message not sent: 24h window closed")
        );
        assert_eq!(send_failure(None), None);
    }

    #[test]
    fn platform_names_parse() {
        assert_eq!(parse_platform("whatsapp"), Ok(Platform::WhatsApp));
        assert!(parse_platform("fax").is_err());
    }
}
