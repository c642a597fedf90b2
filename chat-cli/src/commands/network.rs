//! Check and repair the wallet network.

use anyhow::{Context, Result};
use talk2me_chat_client::{ChatSession, MockWallet, NetworkGuard, SessionConfig};
use talk2me_chat_core::NetworkStatus;
use talk2me_chat_types::Address;

use crate::config::seeded_ledger;

/// Run the network command.
pub async fn run(config: SessionConfig, actor: Address, current_chain: u64) -> Result<()> {
    let target = config.network.chain_definition();
    let guard = NetworkGuard::new(MockWallet::new(current_chain), target);
    let session = ChatSession::new(config, actor, seeded_ledger(actor));

    let target = guard.target();
    println!("Target: {} ({})", target.chain_name, target.chain_id_hex());

    let status = guard.check_network().await.context("Wallet unavailable")?;
    println!("Status: {}", describe(status));
    if status.is_correct() {
        return Ok(());
    }

    session
        .ensure_network(&guard)
        .await
        .context("Could not switch network")?;
    let chain_id = guard.wallet().current_chain();
    println!("Status: {}", describe(guard.status().await));

    if let Some(report) = session.handle_chain_changed(&guard, chain_id).await? {
        println!();
        println!("Session re-initialized on chain {chain_id}:");
        println!("  Global room: {}", report.global_room.map_or("-".to_string(), |r| r.to_string()));
        println!("  Rooms:       {}", report.rooms.len());
    }

    Ok(())
}

fn describe(status: NetworkStatus) -> String {
    match status {
        NetworkStatus::Correct => "correct".to_string(),
        NetworkStatus::Incorrect { current } => format!("wrong network (chain {current})"),
        NetworkStatus::Unknown => "unknown".to_string(),
    }
}
