//! Active room view with staleness tagging.
//!
//! Message loads are asynchronous and the user can switch rooms while one is
//! in flight. Every load is tagged with a [`ViewTicket`] naming the room and
//! the view generation it was issued for; a response is applied only if the
//! view still shows that room at that generation.

use talk2me_chat_types::{Message, RoomId};

/// Tag attached to a message load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewTicket {
    /// Room the load was issued for.
    pub room: RoomId,
    /// View generation at issue time.
    pub generation: u64,
}

/// What the application is currently showing.
#[derive(Debug, Clone, Default)]
pub struct RoomView {
    active: Option<RoomId>,
    generation: u64,
    messages: Vec<Message>,
}

impl RoomView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the view at `room`, dropping what was displayed.
    ///
    /// Bumps the generation so loads issued earlier are discarded.
    pub fn switch_to(&mut self, room: RoomId) -> ViewTicket {
        self.generation += 1;
        self.active = Some(room);
        self.messages.clear();
        ViewTicket {
            room,
            generation: self.generation,
        }
    }

    /// Ticket for a load of `room`, if it is the active room.
    pub fn ticket_for(&self, room: RoomId) -> Option<ViewTicket> {
        (self.active == Some(room)).then_some(ViewTicket {
            room,
            generation: self.generation,
        })
    }

    /// Apply a load result. Returns false (and changes nothing) if stale.
    pub fn apply(&mut self, ticket: ViewTicket, messages: Vec<Message>) -> bool {
        if !self.accepts(ticket) {
            return false;
        }
        self.messages = messages;
        true
    }

    /// Whether a response tagged `ticket` is still current.
    pub fn accepts(&self, ticket: ViewTicket) -> bool {
        self.active == Some(ticket.room) && self.generation == ticket.generation
    }

    /// Forget everything; pending loads become stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.active = None;
        self.messages.clear();
    }

    /// Currently active room.
    pub fn active_room(&self) -> Option<RoomId> {
        self.active
    }

    /// Displayed messages.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
