//! Register an identity.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use talk2me_chat_client::{ChatSession, MockContentStore, SessionConfig};
use talk2me_chat_types::Address;

use super::confirm;
use crate::config::seeded_ledger;

/// Run the register command.
pub async fn run(
    config: SessionConfig,
    actor: Address,
    name: &str,
    image: &Path,
    bio: &str,
) -> Result<()> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image {}", image.display()))?;

    let store = Arc::new(MockContentStore::new());
    let session = ChatSession::with_content_store(config, actor, seeded_ledger(actor), store);

    let tx = session
        .register(name, &bytes, bio)
        .await
        .context("Registration failed")?;
    println!("Registration submitted: {tx}");
    confirm(&session, tx).await?;

    let status = session.check_registration(actor).await?;
    println!();
    println!("Registered: {}", if status.registered { "yes" } else { "no" });
    if let Some(record) = status.record {
        println!("  Name:  {}", record.ens_name);
        println!("  Image: {}", truncate(&record.profile_image_ref, 48));
        println!("  Bio:   {}", record.bio);
    }

    println!();
    println!("Directory:");
    for user in session.list_registered_users().await? {
        println!("  {} ({})", user.ens_name, user.owner);
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
