//! In-memory ledger for tests and the CLI.
//!
//! Implements both registries over plain collections, with failure injection
//! and per-function call counters for verification.

use super::Ledger;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use talk2me_chat_types::{
    Address, IdentityRecord, RawMessage, ReadCall, ReadValue, RoomId, RpcFailure, TxHash,
    WriteCall, CODE_USER_REJECTED,
};

const GLOBAL_ROOM_SEED: u64 = 0x6c6f_6261_6c00;
const DIRECT_ROOM_BASE: u64 = 0x1000;
const GENESIS_SECS: u64 = 1_700_000_000;

/// In-memory ledger.
///
/// Cloning yields another handle to the same ledger, so a test can keep one
/// handle for injection and inspection while the session owns another.
#[derive(Debug, Default)]
pub struct MockLedger {
    inner: Arc<Mutex<MockLedgerInner>>,
}

#[derive(Debug)]
struct MockLedgerInner {
    signer: Address,
    clock_secs: u64,
    nonce: u64,

    records: HashMap<Address, IdentityRecord>,
    registration_order: Vec<Address>,

    global_room: RoomId,
    rooms: HashMap<RoomId, Room>,
    next_room: u64,

    receipts: HashMap<TxHash, Receipt>,

    read_failures: VecDeque<RpcFailure>,
    function_failures: HashMap<&'static str, VecDeque<RpcFailure>>,
    fail_next_write: Option<RpcFailure>,
    revert_next_receipt: Option<String>,
    stall_next_confirmation: bool,
    deny_joins: bool,

    reads: HashMap<&'static str, usize>,
    writes: HashMap<&'static str, usize>,

    latency: Duration,
    room_latency: HashMap<RoomId, Duration>,
}

#[derive(Debug, Default)]
struct Room {
    participants: HashSet<Address>,
    messages: Vec<RawMessage>,
}

#[derive(Debug, Clone)]
enum Receipt {
    Included,
    Reverted(String),
    Stalled,
}

impl Default for MockLedgerInner {
    fn default() -> Self {
        let global_room = RoomId::from_low_u64_be(GLOBAL_ROOM_SEED);
        let mut rooms = HashMap::new();
        rooms.insert(global_room, Room::default());
        Self {
            signer: Address::from_low_u64_be(1),
            clock_secs: GENESIS_SECS,
            nonce: 0,
            records: HashMap::new(),
            registration_order: Vec::new(),
            global_room,
            rooms,
            next_room: DIRECT_ROOM_BASE,
            receipts: HashMap::new(),
            read_failures: VecDeque::new(),
            function_failures: HashMap::new(),
            fail_next_write: None,
            revert_next_receipt: None,
            stall_next_confirmation: false,
            deny_joins: false,
            reads: HashMap::new(),
            writes: HashMap::new(),
            latency: Duration::ZERO,
            room_latency: HashMap::new(),
        }
    }
}

fn revert(reason: &str) -> RpcFailure {
    RpcFailure::new(format!("execution reverted: {reason}"))
}

impl MockLedger {
    /// Create an empty ledger. Writes are signed by `Address::from_low_u64_be(1)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty ledger whose writes are signed by `signer`.
    pub fn with_signer(signer: Address) -> Self {
        let ledger = Self::default();
        ledger.lock().signer = signer;
        ledger
    }

    fn lock(&self) -> MutexGuard<'_, MockLedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Account that signs writes and issues reads.
    pub fn signer(&self) -> Address {
        self.lock().signer
    }

    /// Id of the global room.
    pub fn global_room(&self) -> RoomId {
        self.lock().global_room
    }

    /// Register `owner` directly, bypassing signatures.
    pub fn seed_registration(&self, owner: Address, name: &str, image_ref: &str, bio: &str) {
        let mut inner = self.lock();
        inner.insert_record(owner, name.to_string(), image_ref.to_string(), bio.to_string());
    }

    /// Mark a registered account inactive.
    pub fn deactivate(&self, owner: Address) {
        if let Some(record) = self.lock().records.get_mut(&owner) {
            record.is_active = false;
        }
    }

    /// Add `address` to the global room.
    pub fn seed_global_participant(&self, address: Address) {
        let mut inner = self.lock();
        let global = inner.global_room;
        inner.room_mut(global).participants.insert(address);
    }

    /// Remove `address` from `room`, leaving local state stale.
    pub fn remove_participant(&self, room: RoomId, address: Address) {
        if let Some(room) = self.lock().rooms.get_mut(&room) {
            room.participants.remove(&address);
        }
    }

    /// Create a direct room between two accounts.
    pub fn seed_direct_room(&self, a: Address, b: Address) -> RoomId {
        self.lock().create_room(a, b)
    }

    /// Append a message to `room` as if `sender` had sent it.
    pub fn seed_message(&self, room: RoomId, sender: Address, recipient: Address, content: &str) {
        let mut inner = self.lock();
        inner.append_message(room, sender, recipient, content.to_string());
    }

    /// Messages currently stored for `room`.
    pub fn messages(&self, room: RoomId) -> Vec<RawMessage> {
        self.lock()
            .rooms
            .get(&room)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    /// Whether `address` participates in `room`.
    pub fn is_participant(&self, room: RoomId, address: Address) -> bool {
        self.lock()
            .rooms
            .get(&room)
            .is_some_and(|r| r.participants.contains(&address))
    }

    /// Record stored for `owner`.
    pub fn record(&self, owner: Address) -> Option<IdentityRecord> {
        self.lock().records.get(&owner).cloned()
    }

    // ------------------------------------------------------------------
    // Failure injection
    // ------------------------------------------------------------------

    /// Fail the next `count` reads of any function with `failure`.
    pub fn fail_next_reads(&self, count: usize, failure: RpcFailure) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.read_failures.push_back(failure.clone());
        }
    }

    /// Fail the next `count` reads of `function` with `failure`.
    pub fn fail_function(&self, function: &'static str, count: usize, failure: RpcFailure) {
        let mut inner = self.lock();
        let queue = inner.function_failures.entry(function).or_default();
        for _ in 0..count {
            queue.push_back(failure.clone());
        }
    }

    /// Fail the next write with `failure`.
    pub fn fail_next_write(&self, failure: RpcFailure) {
        self.lock().fail_next_write = Some(failure);
    }

    /// Make the next write fail as if the user declined to sign.
    pub fn reject_next_signature(&self) {
        self.fail_next_write(RpcFailure::with_code(
            CODE_USER_REJECTED,
            "User rejected the request.",
        ));
    }

    /// Accept the next write but revert its receipt with `reason`.
    pub fn revert_next_receipt(&self, reason: &str) {
        self.lock().revert_next_receipt = Some(reason.to_string());
    }

    /// Accept the next write but never produce its receipt.
    pub fn stall_next_confirmation(&self) {
        self.lock().stall_next_confirmation = true;
    }

    /// Confirm join writes without adding the signer to the room.
    pub fn deny_joins(&self, deny: bool) {
        self.lock().deny_joins = deny;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Delay message reads of `room` by `latency`, on top of the global latency.
    pub fn set_room_latency(&self, room: RoomId, latency: Duration) {
        self.lock().room_latency.insert(room, latency);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of reads of `function` served or failed.
    pub fn read_count(&self, function: &str) -> usize {
        self.lock().reads.get(function).copied().unwrap_or(0)
    }

    /// Number of writes of `function` attempted.
    pub fn write_count(&self, function: &str) -> usize {
        self.lock().writes.get(function).copied().unwrap_or(0)
    }

    /// Total reads.
    pub fn total_reads(&self) -> usize {
        self.lock().reads.values().sum()
    }

    /// Total writes.
    pub fn total_writes(&self) -> usize {
        self.lock().writes.values().sum()
    }

    fn delay_for(&self, call: &ReadCall) -> Duration {
        let inner = self.lock();
        let extra = match call {
            ReadCall::GetRoomMessages { room, .. } => {
                inner.room_latency.get(room).copied().unwrap_or_default()
            }
            _ => Duration::ZERO,
        };
        inner.latency + extra
    }
}

impl Clone for MockLedger {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl MockLedgerInner {
    fn tick(&mut self) -> u64 {
        self.clock_secs += 1;
        self.clock_secs
    }

    fn room_mut(&mut self, room: RoomId) -> &mut Room {
        self.rooms.entry(room).or_default()
    }

    fn insert_record(&mut self, owner: Address, name: String, image_ref: String, bio: String) {
        let registration_time = self.tick();
        if !self.records.contains_key(&owner) {
            self.registration_order.push(owner);
        }
        self.records.insert(
            owner,
            IdentityRecord {
                owner,
                ens_name: name,
                profile_image_ref: image_ref,
                bio,
                registration_time,
                is_active: true,
            },
        );
    }

    fn create_room(&mut self, a: Address, b: Address) -> RoomId {
        self.next_room += 1;
        let id = RoomId::from_low_u64_be(self.next_room);
        let room = self.room_mut(id);
        room.participants.insert(a);
        room.participants.insert(b);
        id
    }

    fn append_message(&mut self, room: RoomId, sender: Address, recipient: Address, content: String) {
        let timestamp = self.tick();
        self.room_mut(room).messages.push(RawMessage {
            sender,
            recipient,
            content,
            timestamp,
            is_read: false,
        });
    }

    fn participates(&self, room: RoomId, address: Address) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|r| r.participants.contains(&address))
    }

    fn direct_room_between(&self, a: Address, b: Address) -> Option<RoomId> {
        self.rooms.iter().find_map(|(id, room)| {
            (*id != self.global_room
                && room.participants.len() == 2
                && room.participants.contains(&a)
                && room.participants.contains(&b))
            .then_some(*id)
        })
    }

    fn next_read_failure(&mut self, function: &'static str) -> Option<RpcFailure> {
        if let Some(failure) = self
            .function_failures
            .get_mut(function)
            .and_then(VecDeque::pop_front)
        {
            return Some(failure);
        }
        self.read_failures.pop_front()
    }

    fn serve(&self, call: &ReadCall) -> Result<ReadValue, RpcFailure> {
        match call {
            ReadCall::IsRegistered(address) => {
                Ok(ReadValue::Bool(self.records.contains_key(address)))
            }
            ReadCall::GetRecord(address) => self
                .records
                .get(address)
                .cloned()
                .map(ReadValue::Record)
                .ok_or_else(|| revert("User not registered")),
            ReadCall::ListRegisteredAddresses => {
                Ok(ReadValue::Addresses(self.registration_order.clone()))
            }
            ReadCall::GetGlobalRoomId => Ok(ReadValue::Room(self.global_room)),
            ReadCall::GetRoomMessages {
                room,
                offset,
                limit,
            } => {
                let stored = self
                    .rooms
                    .get(room)
                    .ok_or_else(|| revert("Room does not exist"))?;
                if !stored.participants.contains(&self.signer) {
                    return Err(revert("Not a participant"));
                }
                let start = usize::try_from(*offset).unwrap_or(usize::MAX);
                let take = usize::try_from(*limit).unwrap_or(usize::MAX);
                let page = stored
                    .messages
                    .iter()
                    .skip(start)
                    .take(take)
                    .cloned()
                    .collect();
                Ok(ReadValue::Messages(page))
            }
            ReadCall::GetUserRooms(address) => {
                let mut rooms: Vec<RoomId> = self
                    .rooms
                    .iter()
                    .filter(|(_, r)| r.participants.contains(address))
                    .map(|(id, _)| *id)
                    .collect();
                rooms.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
                Ok(ReadValue::Rooms(rooms))
            }
            ReadCall::IsParticipant { room, address } => {
                Ok(ReadValue::Bool(self.participates(*room, *address)))
            }
            ReadCall::IsGlobalParticipant(address) => {
                Ok(ReadValue::Bool(self.participates(self.global_room, *address)))
            }
        }
    }

    /// Check preconditions a real provider would surface at gas estimation.
    fn precheck(&self, call: &WriteCall) -> Result<(), RpcFailure> {
        let signer = self.signer;
        match call {
            WriteCall::Register { name, .. } => {
                if self.records.contains_key(&signer) {
                    return Err(revert("User already registered"));
                }
                if name.is_empty() {
                    return Err(revert("Name required"));
                }
            }
            WriteCall::SendGroupMessage { .. } => {
                if !self.participates(self.global_room, signer) {
                    return Err(revert("Not a participant"));
                }
            }
            WriteCall::SendMessage { room, .. } => {
                if !self.rooms.contains_key(room) {
                    return Err(revert("Room does not exist"));
                }
                if !self.participates(*room, signer) {
                    return Err(revert("Not a participant"));
                }
            }
            WriteCall::CreateDirectRoom { participant } => {
                if *participant == signer || participant.is_zero() {
                    return Err(revert("Invalid participant"));
                }
                if self.direct_room_between(signer, *participant).is_some() {
                    return Err(revert("Room already exists"));
                }
            }
            WriteCall::JoinGlobalRoom => {}
        }
        Ok(())
    }

    fn apply(&mut self, call: &WriteCall) {
        let signer = self.signer;
        match call {
            WriteCall::Register {
                name,
                image_ref,
                bio,
            } => self.insert_record(signer, name.clone(), image_ref.clone(), bio.clone()),
            WriteCall::SendGroupMessage { content } => {
                let global = self.global_room;
                self.append_message(global, signer, Address::ZERO, content.clone());
            }
            WriteCall::SendMessage {
                room,
                recipient,
                content,
            } => self.append_message(*room, signer, *recipient, content.clone()),
            WriteCall::CreateDirectRoom { participant } => {
                self.create_room(signer, *participant);
            }
            WriteCall::JoinGlobalRoom => {
                if !self.deny_joins {
                    let global = self.global_room;
                    self.room_mut(global).participants.insert(signer);
                }
            }
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn read(&self, call: &ReadCall) -> Result<ReadValue, RpcFailure> {
        let delay = self.delay_for(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        *inner.reads.entry(call.function_name()).or_default() += 1;

        // Check for forced failure
        if let Some(failure) = inner.next_read_failure(call.function_name()) {
            return Err(failure);
        }

        inner.serve(call)
    }

    async fn write(&self, call: &WriteCall) -> Result<TxHash, RpcFailure> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        *inner.writes.entry(call.function_name()).or_default() += 1;

        // Check for forced failure
        if let Some(failure) = inner.fail_next_write.take() {
            return Err(failure);
        }
        inner.precheck(call)?;

        inner.nonce += 1;
        let hash = TxHash::from_low_u64_be(inner.nonce);

        let receipt = if let Some(reason) = inner.revert_next_receipt.take() {
            Receipt::Reverted(reason)
        } else if std::mem::take(&mut inner.stall_next_confirmation) {
            Receipt::Stalled
        } else {
            inner.apply(call);
            Receipt::Included
        };
        inner.receipts.insert(hash, receipt);
        Ok(hash)
    }

    async fn confirmation(&self, hash: &TxHash) -> Result<(), RpcFailure> {
        let receipt = self.lock().receipts.get(hash).cloned();
        match receipt {
            Some(Receipt::Included) => Ok(()),
            Some(Receipt::Reverted(reason)) => Err(revert(&reason)),
            Some(Receipt::Stalled) => std::future::pending().await,
            None => Err(RpcFailure::new(format!("unknown transaction {hash}"))),
        }
    }
}
