//! CLI handlers that talk to the running service over its local API.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::cli::args::{MeetingCliArgs, MeetingCommand};
use crate::config::Config;

fn base_url() -> Result<String> {
    let config = Config::load()?;
    Ok(format!("http://127.0.0.1:{}", config.api.port))
}

fn error_message(json: &Value) -> &str {
    json.get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
}

pub async fn handle_meeting_command(args: MeetingCliArgs) -> Result<()> {
    send_command(args.command).await
}

async fn send_command(command: MeetingCommand) -> Result<()> {
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}{}", base_url()?, command.path()))
        .send()
        .await
        .context("Failed to connect to notetaker service. Is it running?")?;

    let status = response.status();
    let json: Value = response.json().await?;

    if !status.is_success() {
        bail!("{:?} failed: {}", command, error_message(&json));
    }

    println!(
        "{} sent (recording was {})",
        json.get("command").and_then(|v| v.as_str()).unwrap_or("command"),
        json.get("recording").and_then(|v| v.as_str()).unwrap_or("unknown")
    );
    Ok(())
}

pub async fn handle_status_command() -> Result<()> {
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/status", base_url()?))
        .send()
        .await
        .context("Failed to connect to notetaker service. Is it running?")?;

    let json: Value = response.json().await?;
    print!("{}", format_status(&json));
    Ok(())
}

fn format_status(json: &Value) -> String {
    let text = |key: &str| json.get(key).and_then(|v| v.as_str());
    let mut out = String::new();

    out.push_str(&format!("Recording: {}\n", text("recording").unwrap_or("unknown")));
    match text("window_id") {
        Some(window) => {
            out.push_str(&format!("Meeting:   {}", window));
            if let Some(platform) = text("platform") {
                out.push_str(&format!(" ({})", platform));
            }
            out.push('\n');
            if let Some(consent) = text("consent") {
                out.push_str(&format!("Consent:   {}\n", consent));
            }
            if let Some(url) = text("meeting_url") {
                out.push_str(&format!("URL:       {}\n", url));
            }
        }
        None => out.push_str("Meeting:   none\n"),
    }

    let signed_in = json.get("signed_in").and_then(|v| v.as_bool()).unwrap_or(false);
    let user = json
        .get("user")
        .and_then(|u| u.get("email").or_else(|| u.get("id")))
        .and_then(|v| v.as_str());
    match (signed_in, user) {
        (true, Some(user)) => out.push_str(&format!("Signed in: {}\n", user)),
        (true, None) => out.push_str("Signed in: yes\n"),
        (false, _) => out.push_str("Signed in: no (run `notetaker login`)\n"),
    }
    out
}
