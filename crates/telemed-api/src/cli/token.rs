//! Chat token issuance command (operator helper).

use anyhow::Result;
use chrono::Duration;
use console::style;
use telemed_core::identity::{TokenRepository, UserRepository};
use uuid::Uuid;

use crate::state::AppState;

/// Issue a WebSocket chat token for a user and print it.
pub async fn issue_token(
    state: &AppState,
    user_id: Uuid,
    ttl_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let user = state
        .user_repo
        .get_user(&user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown user: {user_id}"))?;

    let ttl = Duration::seconds(ttl_secs.unwrap_or(state.config.token_ttl_secs) as i64);
    let token = state.token_repo.issue(&user.id, ttl).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&token)?);
    } else {
        println!();
        println!(
            "  {} Chat token for {} (expires {}):",
            style("🎫").bold(),
            style(&user.display_name).cyan(),
            token.expires_at.to_rfc3339()
        );
        println!();
        println!("  {}", style(&token.token).yellow().bold());
        println!();
    }

    Ok(())
}
