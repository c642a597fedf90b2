//! Ledger call descriptions.
//!
//! Reads and writes against the two logical contracts are described as data
//! so the gateway, cache and tracker can key, log and replay them without
//! knowing anything about encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LedgerError;
use crate::ids::{Address, RoomId};
use crate::message::{IdentityRecord, RawMessage};

/// The logical contracts the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Contract {
    /// Name/profile registry.
    IdentityRegistry,
    /// Rooms, participants and messages.
    ChatRegistry,
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contract::IdentityRegistry => write!(f, "identity registry"),
            Contract::ChatRegistry => write!(f, "chat registry"),
        }
    }
}

/// A read-only ledger call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadCall {
    /// `isRegistered(address) -> bool`
    IsRegistered(Address),
    /// `getRecord(address) -> Record`
    GetRecord(Address),
    /// `listRegisteredAddresses() -> address[]`
    ListRegisteredAddresses,
    /// `getGlobalRoomId() -> roomId`
    GetGlobalRoomId,
    /// `getRoomMessages(roomId, offset, limit) -> Message[]`
    GetRoomMessages {
        /// Room to read.
        room: RoomId,
        /// Index of the first message.
        offset: u64,
        /// Maximum number of messages.
        limit: u64,
    },
    /// `getUserRooms(address) -> roomId[]`
    GetUserRooms(Address),
    /// `isParticipant(roomId, address) -> bool`
    IsParticipant {
        /// Room to check.
        room: RoomId,
        /// Account to check.
        address: Address,
    },
    /// `isGlobalParticipant(address) -> bool`
    IsGlobalParticipant(Address),
}

impl ReadCall {
    /// The contract this call targets.
    pub fn contract(&self) -> Contract {
        match self {
            ReadCall::IsRegistered(_)
            | ReadCall::GetRecord(_)
            | ReadCall::ListRegisteredAddresses => Contract::IdentityRegistry,
            _ => Contract::ChatRegistry,
        }
    }

    /// The contract function name.
    pub fn function_name(&self) -> &'static str {
        match self {
            ReadCall::IsRegistered(_) => "isRegistered",
            ReadCall::GetRecord(_) => "getRecord",
            ReadCall::ListRegisteredAddresses => "listRegisteredAddresses",
            ReadCall::GetGlobalRoomId => "getGlobalRoomId",
            ReadCall::GetRoomMessages { .. } => "getRoomMessages",
            ReadCall::GetUserRooms(_) => "getUserRooms",
            ReadCall::IsParticipant { .. } => "isParticipant",
            ReadCall::IsGlobalParticipant(_) => "isGlobalParticipant",
        }
    }

    /// Stable cache key: function name plus rendered arguments.
    pub fn cache_key(&self) -> String {
        match self {
            ReadCall::IsRegistered(a) => format!("isRegistered:{a}"),
            ReadCall::GetRecord(a) => format!("getRecord:{a}"),
            ReadCall::ListRegisteredAddresses => "listRegisteredAddresses".to_string(),
            ReadCall::GetGlobalRoomId => "getGlobalRoomId".to_string(),
            ReadCall::GetRoomMessages {
                room,
                offset,
                limit,
            } => format!("getRoomMessages:{room}:{offset}:{limit}"),
            ReadCall::GetUserRooms(a) => format!("getUserRooms:{a}"),
            ReadCall::IsParticipant { room, address } => {
                format!("isParticipant:{room}:{address}")
            }
            ReadCall::IsGlobalParticipant(a) => format!("isGlobalParticipant:{a}"),
        }
    }
}

/// A state-changing ledger call that needs a signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCall {
    /// `register(name, imageRef, bio)`
    Register {
        /// Full registered name (including suffix).
        name: String,
        /// Content reference of the profile image.
        image_ref: String,
        /// Free-form bio.
        bio: String,
    },
    /// `sendGroupMessage(content)`
    SendGroupMessage {
        /// Message text.
        content: String,
    },
    /// `sendMessage(roomId, recipient, content)`
    SendMessage {
        /// Direct room.
        room: RoomId,
        /// Recipient account.
        recipient: Address,
        /// Message text.
        content: String,
    },
    /// `createDirectRoom(participant) -> roomId`
    CreateDirectRoom {
        /// The other participant.
        participant: Address,
    },
    /// `joinGlobalRoom()`
    JoinGlobalRoom,
}

impl WriteCall {
    /// The contract this call targets.
    pub fn contract(&self) -> Contract {
        match self {
            WriteCall::Register { .. } => Contract::IdentityRegistry,
            _ => Contract::ChatRegistry,
        }
    }

    /// The contract function name.
    pub fn function_name(&self) -> &'static str {
        match self {
            WriteCall::Register { .. } => "register",
            WriteCall::SendGroupMessage { .. } => "sendGroupMessage",
            WriteCall::SendMessage { .. } => "sendMessage",
            WriteCall::CreateDirectRoom { .. } => "createDirectRoom",
            WriteCall::JoinGlobalRoom => "joinGlobalRoom",
        }
    }
}

// Content and image references can be large; keep them out of logs.
impl fmt::Debug for WriteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteCall::Register {
                name,
                image_ref,
                bio,
            } => f
                .debug_struct("Register")
                .field("name", name)
                .field("image_ref", &format!("[{} bytes]", image_ref.len()))
                .field("bio", &format!("[{} bytes]", bio.len()))
                .finish(),
            WriteCall::SendGroupMessage { content } => f
                .debug_struct("SendGroupMessage")
                .field("content", &format!("[{} bytes]", content.len()))
                .finish(),
            WriteCall::SendMessage {
                room,
                recipient,
                content,
            } => f
                .debug_struct("SendMessage")
                .field("room", room)
                .field("recipient", recipient)
                .field("content", &format!("[{} bytes]", content.len()))
                .finish(),
            WriteCall::CreateDirectRoom { participant } => f
                .debug_struct("CreateDirectRoom")
                .field("participant", participant)
                .finish(),
            WriteCall::JoinGlobalRoom => write!(f, "JoinGlobalRoom"),
        }
    }
}

/// Decoded return value of a [`ReadCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadValue {
    /// A boolean flag.
    Bool(bool),
    /// An identity record.
    Record(IdentityRecord),
    /// A list of addresses.
    Addresses(Vec<Address>),
    /// A single room id.
    Room(RoomId),
    /// A list of room ids.
    Rooms(Vec<RoomId>),
    /// A page of messages.
    Messages(Vec<RawMessage>),
}

impl ReadValue {
    fn kind(&self) -> &'static str {
        match self {
            ReadValue::Bool(_) => "bool",
            ReadValue::Record(_) => "record",
            ReadValue::Addresses(_) => "address[]",
            ReadValue::Room(_) => "roomId",
            ReadValue::Rooms(_) => "roomId[]",
            ReadValue::Messages(_) => "message[]",
        }
    }

    fn unexpected(&self, wanted: &str) -> LedgerError {
        LedgerError::Unknown(format!(
            "unexpected return type: wanted {wanted}, got {}",
            self.kind()
        ))
    }

    /// Interpret as a boolean.
    pub fn into_bool(self) -> Result<bool, LedgerError> {
        match self {
            ReadValue::Bool(b) => Ok(b),
            other => Err(other.unexpected("bool")),
        }
    }

    /// Interpret as an identity record.
    pub fn into_record(self) -> Result<IdentityRecord, LedgerError> {
        match self {
            ReadValue::Record(r) => Ok(r),
            other => Err(other.unexpected("record")),
        }
    }

    /// Interpret as a list of addresses.
    pub fn into_addresses(self) -> Result<Vec<Address>, LedgerError> {
        match self {
            ReadValue::Addresses(a) => Ok(a),
            other => Err(other.unexpected("address[]")),
        }
    }

    /// Interpret as a room id.
    pub fn into_room(self) -> Result<RoomId, LedgerError> {
        match self {
            ReadValue::Room(r) => Ok(r),
            other => Err(other.unexpected("roomId")),
        }
    }

    /// Interpret as a list of room ids.
    pub fn into_rooms(self) -> Result<Vec<RoomId>, LedgerError> {
        match self {
            ReadValue::Rooms(r) => Ok(r),
            other => Err(other.unexpected("roomId[]")),
        }
    }

    /// Interpret as a page of messages.
    pub fn into_messages(self) -> Result<Vec<RawMessage>, LedgerError> {
        match self {
            ReadValue::Messages(m) => Ok(m),
            other => Err(other.unexpected("message[]")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_calls_route_to_contracts() {
        let a = Address::from_low_u64_be(1);
        assert_eq!(ReadCall::IsRegistered(a).contract(), Contract::IdentityRegistry);
        assert_eq!(
            ReadCall::ListRegisteredAddresses.contract(),
            Contract::IdentityRegistry
        );
        assert_eq!(ReadCall::GetGlobalRoomId.contract(), Contract::ChatRegistry);
        assert_eq!(ReadCall::IsGlobalParticipant(a).contract(), Contract::ChatRegistry);
    }

    #[test]
    fn write_calls_route_to_contracts() {
        let register = WriteCall::Register {
            name: "alice.Talk2me".into(),
            image_ref: "ipfs://x".into(),
            bio: String::new(),
        };
        assert_eq!(register.contract(), Contract::IdentityRegistry);
        assert_eq!(WriteCall::JoinGlobalRoom.contract(), Contract::ChatRegistry);
        assert_eq!(WriteCall::JoinGlobalRoom.function_name(), "joinGlobalRoom");
    }

    #[test]
    fn cache_keys_distinguish_arguments() {
        let a = ReadCall::IsRegistered(Address::from_low_u64_be(1));
        let b = ReadCall::IsRegistered(Address::from_low_u64_be(2));
        assert_ne!(a.cache_key(), b.cache_key());

        let page1 = ReadCall::GetRoomMessages {
            room: RoomId::from_low_u64_be(1),
            offset: 0,
            limit: 50,
        };
        let page2 = ReadCall::GetRoomMessages {
            room: RoomId::from_low_u64_be(1),
            offset: 50,
            limit: 50,
        };
        assert_ne!(page1.cache_key(), page2.cache_key());
    }

    #[test]
    fn read_value_conversions_check_type() {
        assert!(ReadValue::Bool(true).into_bool().unwrap());
        let err = ReadValue::Bool(true).into_rooms().unwrap_err();
        assert!(err.to_string().contains("roomId[]"));
    }

    #[test]
    fn write_call_debug_hides_content() {
        let call = WriteCall::SendGroupMessage {
            content: "top secret".into(),
        };
        let debug = format!("{:?}", call);
        assert!(debug.contains("[10 bytes]"));
        assert!(!debug.contains("top secret"));
    }
}
