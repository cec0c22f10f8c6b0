//! Sign-in from the command line, without the service running.

use anyhow::Result;
use std::sync::Arc;

use crate::app::build_auth_manager;
use crate::backend::BackendClient;
use crate::config::Config;

pub async fn handle_login_command() -> Result<()> {
    let config = Config::load()?;
    let backend = Arc::new(BackendClient::new(&config.backend)?);
    let auth = build_auth_manager(&config, backend)?;

    println!("Opening your browser to sign in...");
    auth.login().await?;

    match auth.identity() {
        Some(user) => println!(
            "Signed in as {}",
            user.email.as_deref().unwrap_or(user.id.as_str())
        ),
        None => println!("Signed in"),
    }
    Ok(())
}

pub async fn handle_logout_command() -> Result<()> {
    let config = Config::load()?;
    let backend = Arc::new(BackendClient::new(&config.backend)?);
    build_auth_manager(&config, backend)?.logout().await?;
    println!("Signed out");
    Ok(())
}
