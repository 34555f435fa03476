//! System status command.
//!
//! Shows consultation and message counts, the data directory, and the
//! effective configuration.

use anyhow::Result;
use console::style;
use telemed_core::consultation::repository::ConsultationRepository;

use crate::state::AppState;

/// Display system status.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let consultations = state
        .chat_service
        .repo()
        .count_consultations()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let messages = state
        .chat_service
        .repo()
        .count_messages()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if json {
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "consultations": consultations,
            "messages": messages,
            "config": state.config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!("  {} telemed {}", style("⚕").bold(), env!("CARGO_PKG_VERSION"));
        println!();
        println!("  Data directory:  {}", style(state.data_dir.display()).cyan());
        println!("  Consultations:   {}", style(consultations).bold());
        println!("  Messages:        {}", style(messages).bold());
        println!(
            "  Retry policy:    {} attempts, {} ms base backoff",
            state.config.retry_attempts, state.config.retry_backoff_ms
        );
        println!(
            "  Idle policy:     ping after {} s, close {} s later",
            state.config.idle_ping_secs, state.config.idle_grace_secs
        );
        println!();
    }

    Ok(())
}
