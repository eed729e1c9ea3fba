//! Server command implementation

use std::path::Path;

use anyhow::{Context, Result};
use subscout_core::plaid::PlaidConfig;
use subscout_server::ServerConfig;

use super::open_db;

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_encrypt: bool,
    static_dir: Option<&Path>,
) -> Result<()> {
    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    println!("🚀 Starting Subscout web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);
    if let Some(dir) = static_dir {
        println!("   Static files: {}", dir.display());
    }
    println!("   🔑 Sessions: JWT, {}h lifetime", config.jwt_ttl_hours);
    if !config.allowed_origins.is_empty() {
        println!(
            "   🌐 Allowed origins: {} (SUBSCOUT_ALLOWED_ORIGINS)",
            config.allowed_origins.join(", ")
        );
    }
    match PlaidConfig::from_env() {
        Ok(Some(plaid)) => println!("   🏦 Bank linking: Plaid ({})", plaid.environment.as_str()),
        Ok(None) => println!("   💡 Tip: Set PLAID_CLIENT_ID and PLAID_SECRET to enable bank linking"),
        Err(e) => println!("   ❌ Bank linking disabled: {}", e),
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(db_path, no_encrypt)?;

    let static_dir_str = static_dir
        .map(|p| p.to_str().context("static_dir path must be valid UTF-8"))
        .transpose()?;
    subscout_server::serve_with_config(db, host, port, static_dir_str, config).await?;

    Ok(())
}
