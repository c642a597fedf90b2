//! CLI command implementations.

pub mod init;
pub mod network;
pub mod register;
pub mod send;

use anyhow::{bail, Result};
use talk2me_chat_client::{ChatSession, MockLedger};
use talk2me_chat_types::{Message, TransactionId, TxStatus};

/// Wait for `tx` to settle, failing with the tracker's reason.
pub async fn confirm(session: &ChatSession<MockLedger>, tx: TransactionId) -> Result<()> {
    let outcome = session.tracker().wait(tx).await;
    match outcome.map(|t| t.status) {
        Some(TxStatus::Confirmed) => Ok(()),
        _ => match session.tracker().error(tx) {
            Some(error) => bail!("Transaction {tx} failed: {error}"),
            None => bail!("Transaction {tx} did not confirm"),
        },
    }
}

/// Print messages as a short transcript.
pub fn print_messages(messages: &[Message]) {
    if messages.is_empty() {
        println!("  (no messages)");
        return;
    }
    for message in messages {
        println!("  [{}] {}: {}", message.timestamp_ms / 1000, message.sender, message.content);
    }
}
