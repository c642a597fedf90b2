//! Configuration and demo ledger for chat-cli.

use anyhow::{Context, Result};
use std::path::Path;
use talk2me_chat_client::{MockLedger, SessionConfig};
use talk2me_chat_types::Address;

/// Peer that already lives on the demo ledger.
pub fn demo_peer() -> Address {
    Address::from_low_u64_be(0xb0b)
}

/// Load the session configuration, or the defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

/// In-memory ledger signed by `actor`, with one registered peer chatting in
/// the global room.
pub fn seeded_ledger(actor: Address) -> MockLedger {
    let ledger = MockLedger::with_signer(actor);
    let peer = demo_peer();
    let global = ledger.global_room();

    ledger.seed_registration(peer, "bob.Talk2me", "ipfs://bafybeibob", "first one here");
    ledger.seed_global_participant(peer);
    ledger.seed_message(global, peer, Address::ZERO, "gm");
    ledger.seed_message(global, peer, Address::ZERO, "anyone around?");
    ledger
}
