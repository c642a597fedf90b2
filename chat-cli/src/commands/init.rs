//! Initialize a chat session.

use anyhow::Result;
use std::time::Duration;
use talk2me_chat_client::{ChatSession, SessionConfig};
use talk2me_chat_types::Address;

use super::{confirm, print_messages};
use crate::config::seeded_ledger;

/// Run the init command.
pub async fn run(config: SessionConfig, actor: Address) -> Result<()> {
    let session = ChatSession::new(config, actor, seeded_ledger(actor));
    let report = session.initialize().await?;

    let Some(global) = report.global_room else {
        println!("Chat registry not configured, nothing to do.");
        return Ok(());
    };

    println!("Session initialized!");
    println!();
    println!("  Actor:       {actor}");
    println!("  Global room: {global}");
    println!("  Participant: {}", if report.participant { "yes" } else { "no" });

    if let Some(error) = &report.join_error {
        println!("  Join:        FAILED ({})", error.user_message());
    }
    if let Some(tx) = report.join {
        println!("  Join:        {tx} (waiting for confirmation)");
        confirm(&session, tx).await?;
        // Messages load from the join callback.
        tokio::time::sleep(Duration::from_millis(100)).await;
        println!("  Join:        confirmed");
    }

    match &report.rooms_error {
        Some(error) => println!("  Rooms:       unavailable ({})", error.user_message()),
        None => println!("  Rooms:       {}", report.rooms.len()),
    }

    println!();
    println!("Messages:");
    print_messages(&session.displayed_messages().await);

    Ok(())
}
