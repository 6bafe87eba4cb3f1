//! Runnable Helene server: loads `application.yaml`/`.env`/environment for
//! the active profile, wires up the (optional) Redis cluster bus, and serves
//! until Ctrl-C/SIGTERM. No custom methods or events are registered here —
//! only the built-ins (§4.11) are available; embed `helene` as a library to
//! register application-specific ones instead.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let profile = std::env::var("HELENE_PROFILE").unwrap_or_else(|_| "dev".to_string());
    helene::bootstrap::run(&profile).await?;
    Ok(())
}
