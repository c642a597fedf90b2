//! Broadcast a message.

use anyhow::{Context, Result};
use talk2me_chat_client::{ChatSession, SessionConfig};
use talk2me_chat_types::{Address, MessageKind};

use super::{confirm, print_messages};
use crate::config::seeded_ledger;

/// Run the send command.
pub async fn run(config: SessionConfig, actor: Address, text: &str) -> Result<()> {
    let session = ChatSession::new(config, actor, seeded_ledger(actor));
    let report = session.initialize().await?;

    if let Some(error) = report.join_error {
        return Err(error).context("Could not join the global room");
    }
    if let Some(tx) = report.join {
        println!("Joining the global room...");
        confirm(&session, tx).await?;
    }

    let tx = session
        .send_message(text, MessageKind::Broadcast, None)
        .await
        .context("Failed to send message")?;
    println!("Message submitted: {tx}");
    confirm(&session, tx).await?;

    let global = session.global_room().await?;
    let page = session.switch_room(global).await?;
    println!();
    println!("Global room:");
    print_messages(&page.messages);

    Ok(())
}
