//! Error taxonomy
//!
//! Errors fall into four classes that are handled differently:
//!
//! - [`FormatError`]: truncated or malformed bytes. Always local, never retried;
//!   inbound frames that fail to decode are logged and dropped.
//! - [`StateError`]: an operation was requested against an unknown or departed
//!   entity, or with an out-of-range field. Rejected before any network I/O.
//! - [`ProtocolStatusError`]: the remote entity explicitly rejected a command.
//!   Surfaced verbatim, never retried.
//! - [`TimeoutError`]: no response after the retry ceiling.

use thiserror::Error;

use crate::controller::{CommandKind, CommandStatus, NotificationId};
use crate::datalink::DataLinkError;
use crate::descriptor::DescriptorType;
use crate::pdu::EntityId;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Truncated or malformed wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("truncated frame: {actual} bytes, need at least {required}")]
    TruncatedFrame { required: usize, actual: usize },

    #[error("unsupported ethertype 0x{0:04X}")]
    UnsupportedEthertype(u16),

    #[error("unexpected AVTP subtype 0x{0:02X}")]
    UnexpectedSubtype(u8),

    #[error("malformed PDU: {0}")]
    MalformedPdu(String),

    #[error("truncated {descriptor_type} descriptor: {actual} bytes, need {required}")]
    TruncatedDescriptor {
        descriptor_type: DescriptorType,
        required: usize,
        actual: usize,
    },

    #[error("unknown {protocol} message type {value}")]
    UnknownMessageType { protocol: &'static str, value: u8 },
}

/// Operation rejected locally before anything was transmitted
#[derive(Debug, Error)]
pub enum StateError {
    #[error("entity {0} is unknown")]
    UnknownEntity(EntityId),

    #[error("entity {0} is not available")]
    EntityNotAvailable(EntityId),

    #[error("{command} for {descriptor_type} {descriptor_index} is already pending on entity {entity_id}")]
    DuplicateCommand {
        entity_id: EntityId,
        command: CommandKind,
        descriptor_type: DescriptorType,
        descriptor_index: u16,
    },

    #[error("notification id {0} is already in flight")]
    DuplicateNotificationId(NotificationId),

    #[error("every sequence id towards entity {0} is in use")]
    SequenceIdsExhausted(EntityId),

    #[error("clock source {requested} is not valid for clock domain {clock_domain_index}")]
    InvalidClockSource {
        clock_domain_index: u16,
        requested: u16,
    },

    #[error("sampling rate {requested} Hz is not supported by audio unit {audio_unit_index}")]
    UnsupportedSamplingRate { audio_unit_index: u16, requested: u32 },

    #[error("stream format 0x{requested:016X} is not supported by {descriptor_type} {descriptor_index}")]
    UnsupportedStreamFormat {
        descriptor_type: DescriptorType,
        descriptor_index: u16,
        requested: u64,
    },

    #[error("index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("entity {entity_id} has no {descriptor_type} descriptor {descriptor_index}")]
    NoSuchDescriptor {
        entity_id: EntityId,
        descriptor_type: DescriptorType,
        descriptor_index: u16,
    },

    #[error("transmit failed: {0}")]
    Transmit(#[from] DataLinkError),
}

/// The remote entity answered with a non-success status
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command} rejected by entity {entity_id}: {status}")]
pub struct ProtocolStatusError {
    pub entity_id: EntityId,
    pub command: CommandKind,
    pub status: CommandStatus,
}

/// No response arrived within the wait interval after every retry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{command} to entity {entity_id} timed out after {retries} retries")]
pub struct TimeoutError {
    pub entity_id: EntityId,
    pub command: CommandKind,
    pub retries: u32,
}

/// Any error produced by this crate
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    ProtocolStatus(#[from] ProtocolStatusError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    DataLink(#[from] DataLinkError),
}
