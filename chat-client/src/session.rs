//! Chat session orchestrator.
//!
//! [`ChatSession`] owns everything scoped to one actor on one chain: the read
//! cache, the transaction tracker, a participation machine per room, and the
//! active room view. It drives the pure machines from `chat-core` and performs
//! the I/O they ask for.
//!
//! # Concurrency
//!
//! The session is a cheap handle (`Clone` over an `Arc`) so tracker callbacks
//! can hold it. Each room's participation state sits behind its own async
//! lock, which is held across a join submission: a second join request for
//! the same room waits, then sees the join in flight and returns it instead
//! of writing again.
//!
//! # Example
//!
//! ```ignore
//! let session = ChatSession::new(SessionConfig::default(), actor, ledger);
//! let report = session.initialize().await?;
//! session.send_message("hello", MessageKind::Broadcast, None).await?;
//! ```

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talk2me_chat_core::{
    NetworkStatus, ParticipationAction, ParticipationEvent, ParticipationNotice,
    ParticipationState, RemediationBudget, RetryPolicy, RoomView,
};
use talk2me_chat_types::{
    Address, LedgerError, Message, MessageKind, ReadCall, ReadValue, RoomId, TransactionId,
    TxPurpose, TxStatus, WriteCall,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::cache::ReadCache;
use crate::config::SessionConfig;
use crate::content::ContentStore;
use crate::error::SessionError;
use crate::gateway::{Ledger, LedgerGateway};
use crate::network::{NetworkGuard, Wallet, WalletError};
use crate::tracker::TransactionTracker;

const EVENT_CAPACITY: usize = 64;

/// Upper bound on joins a single load will wait for.
const MAX_JOIN_WAITS: u32 = 2;

/// Something the application may want to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Participation in a room changed in a user-visible way.
    Participation {
        /// Room concerned.
        room: RoomId,
        /// What happened.
        notice: ParticipationNotice,
    },
    /// The displayed messages were replaced.
    MessagesUpdated {
        /// Room displayed.
        room: RoomId,
        /// Messages displayed.
        count: usize,
    },
    /// A direct room was created and bound to its participant.
    DirectRoomReady {
        /// The other participant.
        participant: Address,
        /// The new room.
        room: RoomId,
    },
    /// A tracked write failed.
    TransactionFailed {
        /// Local handle.
        id: TransactionId,
        /// Why it was submitted.
        purpose: TxPurpose,
        /// Short user-facing reason.
        error: String,
    },
}

/// Outcome of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// Nothing to do.
    AlreadyParticipant,
    /// A join was submitted by this request.
    Submitted(TransactionId),
    /// A join was already in flight; this is it.
    InFlight(TransactionId),
}

impl JoinStatus {
    /// The join transaction, if any.
    pub fn transaction(&self) -> Option<TransactionId> {
        match self {
            JoinStatus::AlreadyParticipant => None,
            JoinStatus::Submitted(tx) | JoinStatus::InFlight(tx) => Some(*tx),
        }
    }
}

/// A page of messages and whether it made it to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    /// Room read.
    pub room: RoomId,
    /// Messages, in ledger order.
    pub messages: Vec<Message>,
    /// False if the active room changed while the page was loading.
    pub displayed: bool,
}

/// What [`ChatSession::initialize`] did.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Global room, if the chat registry is configured.
    pub global_room: Option<RoomId>,
    /// Whether the actor already participated in the global room.
    pub participant: bool,
    /// Join submitted (or found in flight) during initialization.
    pub join: Option<TransactionId>,
    /// Why the join could not be submitted.
    pub join_error: Option<SessionError>,
    /// Messages loaded into the view.
    pub messages_loaded: usize,
    /// Rooms the actor participates in.
    pub rooms: Vec<RoomId>,
    /// Why the room list could not be loaded.
    pub rooms_error: Option<SessionError>,
}

#[derive(Debug, Clone, Copy)]
struct JoinTicket {
    tx: TransactionId,
    submitted: bool,
}

#[derive(Debug, Default)]
struct Driven {
    join: Option<JoinTicket>,
    load: bool,
}

pub(crate) struct SessionInner<L> {
    pub(crate) config: SessionConfig,
    pub(crate) actor: Address,
    pub(crate) gateway: Arc<LedgerGateway<L>>,
    pub(crate) cache: ReadCache<ReadValue>,
    pub(crate) tracker: TransactionTracker<L>,
    pub(crate) content: Option<Arc<dyn ContentStore>>,
    retry: RetryPolicy,
    participation: DashMap<RoomId, Arc<Mutex<ParticipationState>>>,
    view: Mutex<RoomView>,
    rooms: Mutex<Vec<RoomId>>,
    direct_rooms: DashMap<Address, RoomId>,
    write_locks: DashMap<(TxPurpose, String), Arc<Mutex<()>>>,
    epoch: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

/// One actor's chat session against the ledger.
pub struct ChatSession<L> {
    pub(crate) inner: Arc<SessionInner<L>>,
}

impl<L> Clone for ChatSession<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: Ledger + 'static> ChatSession<L> {
    /// Create a session for `actor` over `ledger`.
    ///
    /// Registration embeds images inline since there is no content store.
    pub fn new(config: SessionConfig, actor: Address, ledger: L) -> Self {
        Self::build(config, actor, ledger, None)
    }

    /// Create a session that uploads profile images to `store`.
    pub fn with_content_store(
        config: SessionConfig,
        actor: Address,
        ledger: L,
        store: Arc<dyn ContentStore>,
    ) -> Self {
        Self::build(config, actor, ledger, Some(store))
    }

    fn build(
        config: SessionConfig,
        actor: Address,
        ledger: L,
        content: Option<Arc<dyn ContentStore>>,
    ) -> Self {
        let gateway = Arc::new(LedgerGateway::new(ledger, config.contracts.clone()));
        let tracker = TransactionTracker::new(
            Arc::clone(&gateway),
            config.timing.settle_delay(),
            config.timing.join_deadline(),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                cache: ReadCache::new(config.cache.volatile_ttl()),
                retry: config.timing.retry_policy(),
                config,
                actor,
                gateway,
                tracker,
                content,
                participation: DashMap::new(),
                view: Mutex::new(RoomView::new()),
                rooms: Mutex::new(Vec::new()),
                direct_rooms: DashMap::new(),
                write_locks: DashMap::new(),
                epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The local actor.
    pub fn actor(&self) -> Address {
        self.inner.actor
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &L {
        self.inner.gateway.ledger()
    }

    /// The transaction tracker.
    pub fn tracker(&self) -> &TransactionTracker<L> {
        &self.inner.tracker
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Room currently displayed.
    pub async fn active_room(&self) -> Option<RoomId> {
        self.inner.view.lock().await.active_room()
    }

    /// Messages currently displayed.
    pub async fn displayed_messages(&self) -> Vec<Message> {
        self.inner.view.lock().await.messages().to_vec()
    }

    /// Local participation belief for `room`.
    pub async fn participation(&self, room: RoomId) -> ParticipationState {
        let cell = self
            .inner
            .participation
            .get(&room)
            .map(|c| Arc::clone(c.value()));
        match cell {
            Some(cell) => cell.lock().await.clone(),
            None => ParticipationState::Unknown,
        }
    }

    /// Rooms from the last successful room list read.
    pub async fn known_rooms(&self) -> Vec<RoomId> {
        self.inner.rooms.lock().await.clone()
    }

    /// Direct room bound to `participant`.
    pub fn direct_room(&self, participant: Address) -> Option<RoomId> {
        self.inner.direct_rooms.get(&participant).map(|r| *r)
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Fail with `Invalidated` if the session was invalidated since `epoch`.
    fn ensure_epoch(&self, epoch: u64) -> Result<(), SessionError> {
        if self.epoch() == epoch {
            Ok(())
        } else {
            Err(SessionError::Invalidated)
        }
    }

    fn page_limit(&self) -> u64 {
        self.inner.config.messages.page_limit
    }

    pub(crate) fn volatile_ttl(&self) -> Duration {
        self.inner.config.cache.volatile_ttl()
    }

    pub(crate) fn notify(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn pause(&self) {
        tokio::time::sleep(self.inner.config.timing.step_delay()).await;
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read through the gateway, retrying throttled calls per the retry policy.
    pub(crate) async fn read(&self, call: &ReadCall) -> Result<ReadValue, LedgerError> {
        let mut retries = 0;
        loop {
            match self.inner.gateway.read_call(call).await {
                Ok(value) => return Ok(value),
                Err(error) => match self.inner.retry.next_delay(&error, retries) {
                    Some(delay) => {
                        warn!(
                            function = call.function_name(),
                            retry = retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        retries += 1;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// [`read`](Self::read) through the cache.
    pub(crate) async fn read_cached(
        &self,
        call: &ReadCall,
        ttl: Duration,
    ) -> Result<ReadValue, LedgerError> {
        self.inner
            .cache
            .get_or_fetch(&call.cache_key(), ttl, || self.read(call))
            .await
    }

    /// Id of the global room. Cached for the long TTL.
    pub async fn global_room(&self) -> Result<RoomId, SessionError> {
        let ttl = self.inner.config.cache.permanent_ttl();
        Ok(self
            .read_cached(&ReadCall::GetGlobalRoomId, ttl)
            .await?
            .into_room()?)
    }

    /// Whether `room` is the global room. An unconfigured registry has none.
    async fn is_global(&self, room: RoomId) -> Result<bool, LedgerError> {
        let ttl = self.inner.config.cache.permanent_ttl();
        match self.read_cached(&ReadCall::GetGlobalRoomId, ttl).await {
            Ok(value) => Ok(value.into_room()? == room),
            Err(LedgerError::NotConfigured(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn check_participation(&self, room: RoomId) -> Result<bool, LedgerError> {
        let actor = self.inner.actor;
        let call = if self.is_global(room).await? {
            ReadCall::IsGlobalParticipant(actor)
        } else {
            ReadCall::IsParticipant {
                room,
                address: actor,
            }
        };
        self.read_cached(&call, self.volatile_ttl()).await?.into_bool()
    }

    fn invalidate_participation_reads(&self, room: RoomId) {
        let actor = self.inner.actor;
        self.inner
            .cache
            .invalidate(&ReadCall::IsGlobalParticipant(actor).cache_key());
        self.inner.cache.invalidate(
            &ReadCall::IsParticipant {
                room,
                address: actor,
            }
            .cache_key(),
        );
        self.inner
            .cache
            .invalidate(&ReadCall::GetUserRooms(actor).cache_key());
    }

    /// Rooms the actor participates in. Cached for the volatile TTL.
    pub async fn load_user_rooms(&self) -> Result<Vec<RoomId>, SessionError> {
        self.user_rooms(self.epoch()).await
    }

    async fn user_rooms(&self, epoch: u64) -> Result<Vec<RoomId>, SessionError> {
        let call = ReadCall::GetUserRooms(self.inner.actor);
        let rooms = match self.read_cached(&call, self.volatile_ttl()).await {
            Ok(value) => value.into_rooms()?,
            Err(LedgerError::NotConfigured(_)) => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        let mut known = self.inner.rooms.lock().await;
        self.ensure_epoch(epoch)?;
        *known = rooms.clone();
        Ok(rooms)
    }

    async fn refresh_user_rooms(&self, epoch: u64) -> Result<Vec<RoomId>, SessionError> {
        self.inner
            .cache
            .invalidate(&ReadCall::GetUserRooms(self.inner.actor).cache_key());
        self.user_rooms(epoch).await
    }

    // ------------------------------------------------------------------
    // Participation
    // ------------------------------------------------------------------

    fn participation_cell(&self, room: RoomId) -> Arc<Mutex<ParticipationState>> {
        Arc::clone(&self.inner.participation.entry(room).or_default())
    }

    fn step(
        &self,
        room: RoomId,
        state: &mut ParticipationState,
        event: ParticipationEvent,
    ) -> Vec<ParticipationAction> {
        let (next, actions) = state.clone().on_event(event);
        if next != *state {
            debug!(%room, from = ?state, to = ?next, "Participation changed");
        }
        *state = next;
        actions
    }

    /// Feed `event` to a locked machine and perform the actions it returns.
    async fn drive_locked(
        &self,
        room: RoomId,
        state: &mut ParticipationState,
        event: ParticipationEvent,
    ) -> Result<Driven, SessionError> {
        let mut driven = Driven::default();
        let mut queue: VecDeque<_> = self.step(room, state, event).into();

        while let Some(action) = queue.pop_front() {
            match action {
                ParticipationAction::SubmitJoin { remediation } => {
                    info!(%room, remediation, "Submitting join");
                    let tx = self
                        .inner
                        .tracker
                        .submit(TxPurpose::Join, WriteCall::JoinGlobalRoom)
                        .await
                        .map_err(|error| {
                            warn!(%room, %error, "Join submission failed");
                            error
                        })?;
                    queue.extend(self.step(
                        room,
                        state,
                        ParticipationEvent::JoinSubmitted { tx, remediation },
                    ));
                    queue.extend(self.step(room, state, ParticipationEvent::JoinConfirming));
                    driven.join = Some(JoinTicket {
                        tx,
                        submitted: true,
                    });
                }
                ParticipationAction::AwaitJoin { tx } => {
                    driven.join = Some(JoinTicket {
                        tx,
                        submitted: false,
                    });
                }
                ParticipationAction::LoadMessages => driven.load = true,
                ParticipationAction::Emit(notice) => {
                    info!(%room, ?notice, "Participation notice");
                    self.notify(SessionEvent::Participation { room, notice });
                }
            }
        }
        Ok(driven)
    }

    /// [`drive_locked`](Self::drive_locked) on the room's cell, unless the
    /// session was invalidated since `epoch`.
    async fn drive(
        &self,
        room: RoomId,
        event: ParticipationEvent,
        epoch: u64,
    ) -> Result<Driven, SessionError> {
        let cell = self.participation_cell(room);
        let mut state = cell.lock().await;
        self.ensure_epoch(epoch)?;
        self.drive_locked(room, &mut state, event).await
    }

    /// Check (if unknown) and join under the room lock.
    async fn request_join(&self, room: RoomId, epoch: u64) -> Result<JoinStatus, SessionError> {
        let cell = self.participation_cell(room);
        let mut state = cell.lock().await;
        self.ensure_epoch(epoch)?;

        if *state == ParticipationState::Unknown {
            let is_participant = self.check_participation(room).await?;
            self.drive_locked(
                room,
                &mut state,
                ParticipationEvent::CheckCompleted { is_participant },
            )
            .await?;
        }
        let driven = self
            .drive_locked(room, &mut state, ParticipationEvent::JoinRequested)
            .await?;
        drop(state);

        Ok(match driven.join {
            Some(JoinTicket {
                tx,
                submitted: true,
            }) => {
                self.watch_join(room, tx);
                JoinStatus::Submitted(tx)
            }
            Some(JoinTicket {
                tx,
                submitted: false,
            }) => JoinStatus::InFlight(tx),
            None => JoinStatus::AlreadyParticipant,
        })
    }

    /// Finish a user-requested join from tracker callbacks.
    fn watch_join(&self, room: RoomId, tx: TransactionId) {
        let epoch = self.epoch();

        let session = self.clone();
        self.inner.tracker.on_confirmed(tx, move |_| {
            tokio::spawn(async move {
                session.finish_join(room, epoch, None).await;
            });
        });

        let session = self.clone();
        self.inner.tracker.on_failed(tx, move |pending, error| {
            session.notify(SessionEvent::TransactionFailed {
                id: pending.id,
                purpose: pending.purpose,
                error: SessionError::from(error.clone()).user_message(),
            });
            let error = error.clone();
            tokio::spawn(async move {
                session.finish_join(room, epoch, Some(error)).await;
            });
        });
    }

    async fn finish_join(&self, room: RoomId, epoch: u64, failure: Option<LedgerError>) {
        if self.epoch() != epoch {
            debug!(%room, "Join finished after invalidation, ignoring");
            return;
        }
        self.invalidate_participation_reads(room);

        let event = match failure {
            None => ParticipationEvent::JoinConfirmed,
            Some(error) => ParticipationEvent::JoinFailed {
                error: error.to_string(),
            },
        };
        match self.drive(room, event, epoch).await {
            Ok(driven) if driven.load => {
                if let Err(error) = self.load_page(room, 0, self.page_limit(), epoch).await {
                    warn!(%room, %error, "Loading messages after join failed");
                }
            }
            Ok(_) => {}
            Err(error) => warn!(%room, %error, "Finishing join failed"),
        }
    }

    /// Wait for a join this load depends on and feed the outcome back.
    async fn settle_join(
        &self,
        room: RoomId,
        tx: TransactionId,
        epoch: u64,
    ) -> Result<(), SessionError> {
        let outcome = self.inner.tracker.wait(tx).await;
        self.ensure_epoch(epoch)?;
        self.invalidate_participation_reads(room);

        if outcome.as_ref().map(|t| t.status) == Some(TxStatus::Confirmed) {
            self.drive(room, ParticipationEvent::JoinConfirmed, epoch).await?;
            return Ok(());
        }

        let error = self.inner.tracker.error(tx).unwrap_or(LedgerError::Timeout);
        self.drive(
            room,
            ParticipationEvent::JoinFailed {
                error: error.to_string(),
            },
            epoch,
        )
        .await?;
        Err(error.into())
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Bring the session up: global room, participation, messages, room list.
    ///
    /// A needed join is submitted but not awaited; messages load from its
    /// confirmation callback. Failing to load the room list is reported, not
    /// fatal. An invalidation while this runs stops it with `Invalidated`
    /// before it touches session state again.
    pub async fn initialize(&self) -> Result<InitReport, SessionError> {
        let epoch = self.epoch();
        let mut report = InitReport::default();
        info!(actor = %self.inner.actor, epoch, "Initializing chat session");

        let global = match self.global_room().await {
            Ok(room) => room,
            Err(SessionError::Ledger(LedgerError::NotConfigured(contract))) => {
                warn!(%contract, "Skipping initialization, contract not configured");
                return Ok(report);
            }
            Err(error) => return Err(error),
        };
        report.global_room = Some(global);
        {
            let mut view = self.inner.view.lock().await;
            self.ensure_epoch(epoch)?;
            view.switch_to(global);
        }
        self.pause().await;

        let is_participant = self.check_participation(global).await?;
        let driven = self
            .drive(
                global,
                ParticipationEvent::CheckCompleted { is_participant },
                epoch,
            )
            .await?;
        report.participant = is_participant;

        if !is_participant {
            self.pause().await;
            match self.request_join(global, epoch).await {
                Ok(status) => report.join = status.transaction(),
                Err(SessionError::Invalidated) => return Err(SessionError::Invalidated),
                Err(error) => {
                    warn!(%error, "Could not join the global room");
                    report.join_error = Some(error);
                }
            }
        }

        if driven.load {
            self.pause().await;
            let page = self.load_page(global, 0, self.page_limit(), epoch).await?;
            report.messages_loaded = page.messages.len();
        }

        self.pause().await;
        match self.user_rooms(epoch).await {
            Ok(rooms) => report.rooms = rooms,
            Err(SessionError::Invalidated) => return Err(SessionError::Invalidated),
            Err(error) => {
                warn!(%error, "Could not load room list");
                report.rooms_error = Some(error);
            }
        }

        info!(
            %global,
            participant = report.participant,
            messages = report.messages_loaded,
            rooms = report.rooms.len(),
            "Chat session initialized"
        );
        Ok(report)
    }

    /// Read a page of `room` and display it if `room` is still active.
    ///
    /// A participation refusal triggers at most one automatic re-join; if the
    /// ledger still refuses afterwards the load fails with `NotAParticipant`.
    pub async fn load_messages(
        &self,
        room: RoomId,
        offset: u64,
        limit: u64,
    ) -> Result<LoadedPage, SessionError> {
        self.load_page(room, offset, limit, self.epoch()).await
    }

    async fn load_page(
        &self,
        room: RoomId,
        offset: u64,
        limit: u64,
        epoch: u64,
    ) -> Result<LoadedPage, SessionError> {
        let ticket = self.inner.view.lock().await.ticket_for(room);
        let messages = self.read_messages(room, offset, limit, epoch).await?;

        let displayed = match ticket {
            Some(ticket) => {
                let applied = self.inner.view.lock().await.apply(ticket, messages.clone());
                if applied {
                    self.notify(SessionEvent::MessagesUpdated {
                        room,
                        count: messages.len(),
                    });
                } else {
                    debug!(%room, generation = ticket.generation, "Discarding stale message page");
                }
                applied
            }
            None => false,
        };

        Ok(LoadedPage {
            room,
            messages,
            displayed,
        })
    }

    async fn read_messages(
        &self,
        room: RoomId,
        offset: u64,
        limit: u64,
        epoch: u64,
    ) -> Result<Vec<Message>, SessionError> {
        let call = ReadCall::GetRoomMessages {
            room,
            offset,
            limit,
        };
        let mut budget = RemediationBudget::per_load();
        let mut waits = 0;

        loop {
            match self.read(&call).await {
                Ok(value) => {
                    let raw = value.into_messages()?;
                    self.drive(room, ParticipationEvent::MessagesRead, epoch).await?;
                    debug!(%room, offset, count = raw.len(), "Messages read");
                    return Ok(raw.into_iter().map(Message::from).collect());
                }
                Err(LedgerError::NotConfigured(contract)) => {
                    debug!(%room, %contract, "Contract not configured, empty page");
                    return Ok(Vec::new());
                }
                Err(LedgerError::NotAParticipant) => {
                    // Only the global room can be re-joined by a write.
                    let remediable = self.is_global(room).await?;
                    let remediation_allowed = remediable && budget.try_consume();
                    warn!(%room, remediation_allowed, "Message read refused, not a participant");

                    let driven = self
                        .drive(
                            room,
                            ParticipationEvent::AccessDenied { remediation_allowed },
                            epoch,
                        )
                        .await?;
                    let Some(join) = driven.join else {
                        return Err(LedgerError::NotAParticipant.into());
                    };
                    waits += 1;
                    if waits > MAX_JOIN_WAITS {
                        return Err(LedgerError::NotAParticipant.into());
                    }
                    self.settle_join(room, join.tx, epoch).await?;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Submit a message. Returns once the write is accepted.
    ///
    /// Broadcasts go to the global room. Direct messages need a recipient
    /// with an established direct room. The view refreshes when the write
    /// confirms.
    pub async fn send_message(
        &self,
        content: &str,
        kind: MessageKind,
        recipient: Option<Address>,
    ) -> Result<TransactionId, SessionError> {
        if content.trim().is_empty() {
            return Err(SessionError::EmptyContent);
        }

        let (room, call) = match kind {
            MessageKind::Broadcast => (
                self.global_room().await?,
                WriteCall::SendGroupMessage {
                    content: content.to_string(),
                },
            ),
            MessageKind::Direct => {
                let recipient = recipient.filter(|r| !r.is_zero()).ok_or_else(|| {
                    SessionError::InvalidConfiguration(
                        "direct messages need a recipient".to_string(),
                    )
                })?;
                let room = self.direct_room(recipient).ok_or_else(|| {
                    SessionError::InvalidConfiguration(format!(
                        "no direct room with {recipient}, create one first"
                    ))
                })?;
                (
                    room,
                    WriteCall::SendMessage {
                        room,
                        recipient,
                        content: content.to_string(),
                    },
                )
            }
        };

        let tx = self
            .serialized(
                TxPurpose::Send,
                room.to_string(),
                self.inner.tracker.submit(TxPurpose::Send, call),
            )
            .await?;
        info!(%tx, %room, ?kind, "Message submitted");

        let epoch = self.epoch();
        let session = self.clone();
        self.inner.tracker.on_confirmed(tx, move |_| {
            tokio::spawn(async move {
                session.refresh_if_active(room, epoch).await;
            });
        });
        self.track_failures(tx);
        Ok(tx)
    }

    async fn refresh_if_active(&self, room: RoomId, epoch: u64) {
        if self.epoch() != epoch || self.active_room().await != Some(room) {
            return;
        }
        if let Err(error) = self.load_page(room, 0, self.page_limit(), epoch).await {
            warn!(%room, %error, "Refreshing messages failed");
        }
    }

    /// Display `room` and load its first page.
    pub async fn switch_room(&self, room: RoomId) -> Result<LoadedPage, SessionError> {
        let ticket = self.inner.view.lock().await.switch_to(room);
        info!(%room, generation = ticket.generation, "Switched room");
        self.load_messages(room, 0, self.page_limit()).await
    }

    /// Join `room`.
    ///
    /// Only the global room is joined by a write; direct rooms come from
    /// [`create_direct_room`](Self::create_direct_room).
    pub async fn join_room(&self, room: RoomId) -> Result<JoinStatus, SessionError> {
        let global = self.global_room().await?;
        if room != global {
            return Err(SessionError::InvalidConfiguration(
                "only the global room can be joined, use create_direct_room for direct rooms"
                    .to_string(),
            ));
        }
        self.request_join(room, self.epoch()).await
    }

    /// Open a direct room with `participant`.
    ///
    /// On confirmation the room list is re-read and the room that appeared
    /// is bound to `participant`.
    pub async fn create_direct_room(
        &self,
        participant: Address,
    ) -> Result<TransactionId, SessionError> {
        if participant.is_zero() || participant == self.inner.actor {
            return Err(SessionError::InvalidConfiguration(format!(
                "cannot open a direct room with {participant}"
            )));
        }
        if let Some(room) = self.direct_room(participant) {
            return Err(SessionError::InvalidConfiguration(format!(
                "direct room with {participant} already exists: {room}"
            )));
        }

        let epoch = self.epoch();
        let (tx, before) = self
            .serialized(TxPurpose::CreateRoom, participant.to_string(), async {
                let before: HashSet<RoomId> = match self.refresh_user_rooms(epoch).await {
                    Ok(rooms) => rooms.into_iter().collect(),
                    Err(_) => self.known_rooms().await.into_iter().collect(),
                };
                let tx = self
                    .inner
                    .tracker
                    .submit(
                        TxPurpose::CreateRoom,
                        WriteCall::CreateDirectRoom { participant },
                    )
                    .await?;
                Ok::<_, SessionError>((tx, before))
            })
            .await?;
        info!(%tx, %participant, "Direct room submitted");

        let session = self.clone();
        self.inner.tracker.on_confirmed(tx, move |_| {
            tokio::spawn(async move {
                session.bind_new_room(participant, before, epoch).await;
            });
        });
        self.track_failures(tx);
        Ok(tx)
    }

    async fn bind_new_room(&self, participant: Address, before: HashSet<RoomId>, epoch: u64) {
        if self.epoch() != epoch {
            return;
        }
        let global = self.global_room().await.ok();
        let rooms = match self.refresh_user_rooms(epoch).await {
            Ok(rooms) => rooms,
            Err(error) => {
                warn!(%participant, %error, "Could not read rooms after creating direct room");
                return;
            }
        };

        let mut appeared = rooms
            .into_iter()
            .filter(|r| !before.contains(r) && Some(*r) != global);
        let Some(room) = appeared.next() else {
            warn!(%participant, "Direct room confirmed but missing from room list");
            return;
        };
        if appeared.next().is_some() {
            warn!(%participant, %room, "Several rooms appeared, binding the first");
        }

        if self.epoch() != epoch {
            return;
        }
        self.inner.direct_rooms.insert(participant, room);
        if let Err(error) = self
            .drive(
                room,
                ParticipationEvent::CheckCompleted {
                    is_participant: true,
                },
                epoch,
            )
            .await
        {
            warn!(%room, %error, "Updating participation failed");
        }
        info!(%participant, %room, "Direct room ready");
        self.notify(SessionEvent::DirectRoomReady { participant, room });
    }

    /// Run `work` while holding the write slot for (`purpose`, `key`).
    ///
    /// Writes sharing a slot run one at a time, in arrival order. The slot is
    /// dropped once nobody holds or waits on it.
    pub(crate) async fn serialized<T>(
        &self,
        purpose: TxPurpose,
        key: String,
        work: impl Future<Output = T>,
    ) -> T {
        let slot = (purpose, key);
        let lock = Arc::clone(&self.inner.write_locks.entry(slot.clone()).or_default());
        let result = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.inner
            .write_locks
            .remove_if(&slot, |_, l| Arc::strong_count(l) == 1);
        result
    }

    pub(crate) fn track_failures(&self, tx: TransactionId) {
        let session = self.clone();
        self.inner.tracker.on_failed(tx, move |pending, error| {
            session.notify(SessionEvent::TransactionFailed {
                id: pending.id,
                purpose: pending.purpose,
                error: SessionError::from(error.clone()).user_message(),
            });
        });
    }

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    /// Make sure the wallet is on the target chain, switching if needed.
    pub async fn ensure_network<W: Wallet>(
        &self,
        guard: &NetworkGuard<W>,
    ) -> Result<(), SessionError> {
        match guard.ensure_correct_network().await? {
            NetworkStatus::Correct => Ok(()),
            NetworkStatus::Incorrect { current } => Err(SessionError::WrongNetwork {
                current,
                expected: guard.target().chain_id,
            }),
            NetworkStatus::Unknown => Err(SessionError::Wallet(WalletError::Other(
                "network status unknown".to_string(),
            ))),
        }
    }

    /// Drop everything derived from the current chain.
    ///
    /// Bumps the epoch first, so callbacks and loads already in flight
    /// discard their results.
    pub async fn invalidate_all(&self) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.tracker.cancel_callbacks();
        self.inner.cache.clear();

        let cells: Vec<_> = self
            .inner
            .participation
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        self.inner.participation.clear();
        for (room, cell) in cells {
            // A cell locked by an in-flight join is already detached.
            if let Ok(mut state) = cell.try_lock() {
                self.step(room, &mut state, ParticipationEvent::Invalidated);
            }
        }

        self.inner.direct_rooms.clear();
        self.inner.rooms.lock().await.clear();
        self.inner.view.lock().await.reset();
        info!(epoch, "Session state invalidated");
    }

    /// React to the wallet moving to `chain_id`.
    ///
    /// Invalidates all session state, then re-initializes in place if the new
    /// chain is the target. Returns `None` when it is not.
    pub async fn handle_chain_changed<W: Wallet>(
        &self,
        guard: &NetworkGuard<W>,
        chain_id: u64,
    ) -> Result<Option<InitReport>, SessionError> {
        let status = guard.observe_chain_change(chain_id).await;
        self.invalidate_all().await;

        if !status.is_correct() {
            warn!(chain_id, expected = guard.target().chain_id, "Wallet on wrong network");
            return Ok(None);
        }
        Ok(Some(self.initialize().await?))
    }
}
