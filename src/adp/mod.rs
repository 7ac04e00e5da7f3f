//! AVDECC Discovery Protocol (ADP)
//!
//! Entities announce themselves by multicasting ENTITY_AVAILABLE at least once
//! per valid time, announce shutdown with ENTITY_DEPARTING, and controllers
//! solicit advertisements with ENTITY_DISCOVER.
//!
//! # ADPDU Layout
//!
//! Offsets are from the start of the AVTP header (ethernet payload):
//!
//! | Offset | Field                    | Size |
//! |-------:|--------------------------|-----:|
//! |      0 | common control header    |   12 |
//! |     12 | entity_model_id          |    8 |
//! |     20 | entity_capabilities      |    4 |
//! |     24 | talker_stream_sources    |    2 |
//! |     26 | talker_capabilities      |    2 |
//! |     28 | listener_stream_sinks    |    2 |
//! |     30 | listener_capabilities    |    2 |
//! |     32 | controller_capabilities  |    4 |
//! |     36 | available_index          |    4 |
//! |     40 | gptp_grandmaster_id      |    8 |
//! |     48 | gptp_domain_number       |    1 |
//! |     49 | reserved0                |    3 |
//! |     52 | identify_control_index   |    2 |
//! |     54 | interface_index          |    2 |
//! |     56 | association_id           |    8 |
//! |     64 | reserved1                |    4 |
//!
//! The header's status field carries valid_time in units of two seconds and
//! control_data_length is always 56.

use std::time::Duration;

use bitflags::bitflags;
use bytes::BufMut;

use crate::datalink::ethernet::EthernetFrame;
use crate::datalink::MacAddress;
use crate::encoding::{put_u24, read_u16, read_u24, read_u32, read_u64, read_u8};
use crate::error::FormatError;
use crate::pdu::{CommonControlHeader, EntityId, Subtype, COMMON_CONTROL_HEADER_LEN};

pub mod discovery;

pub use discovery::{AdvertisementOutcome, Liveness, LivenessState};

/// control_data_length of every ADPDU
pub const ADPDU_CONTROL_DATA_LENGTH: u16 = 56;

/// Total ADPDU length including the common control header
pub const ADPDU_LEN: usize = COMMON_CONTROL_HEADER_LEN + ADPDU_CONTROL_DATA_LENGTH as usize;

/// Default advertised valid time, in two-second units (62 s)
pub const DEFAULT_VALID_TIME: u8 = 31;

/// ADP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdpMessageType {
    EntityAvailable = 0,
    EntityDeparting = 1,
    EntityDiscover = 2,
}

impl TryFrom<u8> for AdpMessageType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AdpMessageType::EntityAvailable),
            1 => Ok(AdpMessageType::EntityDeparting),
            2 => Ok(AdpMessageType::EntityDiscover),
            value => Err(FormatError::UnknownMessageType {
                protocol: "ADP",
                value,
            }),
        }
    }
}

bitflags! {
    /// Entity capabilities advertised in ADP
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct EntityCapabilities: u32 {
        const EFU_MODE = 1 << 0;
        const ADDRESS_ACCESS_SUPPORTED = 1 << 1;
        const GATEWAY_ENTITY = 1 << 2;
        const AEM_SUPPORTED = 1 << 3;
        const LEGACY_AVC = 1 << 4;
        const ASSOCIATION_ID_SUPPORTED = 1 << 5;
        const ASSOCIATION_ID_VALID = 1 << 6;
        const VENDOR_UNIQUE_SUPPORTED = 1 << 7;
        const CLASS_A_SUPPORTED = 1 << 8;
        const CLASS_B_SUPPORTED = 1 << 9;
        const GPTP_SUPPORTED = 1 << 10;
        const AEM_AUTHENTICATION_SUPPORTED = 1 << 11;
        const AEM_AUTHENTICATION_REQUIRED = 1 << 12;
        const AEM_PERSISTENT_ACQUIRE_SUPPORTED = 1 << 13;
        const AEM_IDENTIFY_CONTROL_INDEX_VALID = 1 << 14;
        const AEM_INTERFACE_INDEX_VALID = 1 << 15;
        const GENERAL_CONTROLLER_IGNORE = 1 << 16;
        const ENTITY_NOT_READY = 1 << 17;

        const _ = !0;
    }
}

bitflags! {
    /// Talker capabilities advertised in ADP
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct TalkerCapabilities: u16 {
        const IMPLEMENTED = 1 << 0;
        const OTHER_SOURCE = 1 << 9;
        const CONTROL_SOURCE = 1 << 10;
        const MEDIA_CLOCK_SOURCE = 1 << 11;
        const SMPTE_SOURCE = 1 << 12;
        const MIDI_SOURCE = 1 << 13;
        const AUDIO_SOURCE = 1 << 14;
        const VIDEO_SOURCE = 1 << 15;

        const _ = !0;
    }
}

bitflags! {
    /// Listener capabilities advertised in ADP
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ListenerCapabilities: u16 {
        const IMPLEMENTED = 1 << 0;
        const OTHER_SINK = 1 << 9;
        const CONTROL_SINK = 1 << 10;
        const MEDIA_CLOCK_SINK = 1 << 11;
        const SMPTE_SINK = 1 << 12;
        const MIDI_SINK = 1 << 13;
        const AUDIO_SINK = 1 << 14;
        const VIDEO_SINK = 1 << 15;

        const _ = !0;
    }
}

bitflags! {
    /// Controller capabilities advertised in ADP
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ControllerCapabilities: u32 {
        const IMPLEMENTED = 1 << 0;

        const _ = !0;
    }
}

/// A decoded ADPDU. Immutable once parsed; all accessors are projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adpdu {
    source_mac: MacAddress,
    message_type: AdpMessageType,
    valid_time: u8,
    entity_id: EntityId,
    entity_model_id: u64,
    entity_capabilities: EntityCapabilities,
    talker_stream_sources: u16,
    talker_capabilities: TalkerCapabilities,
    listener_stream_sinks: u16,
    listener_capabilities: ListenerCapabilities,
    controller_capabilities: ControllerCapabilities,
    available_index: u32,
    gptp_grandmaster_id: u64,
    gptp_domain_number: u8,
    reserved0: u32,
    identify_control_index: u16,
    interface_index: u16,
    association_id: u64,
    reserved1: u32,
}

/// Decode an ADPDU from an AVDECC Ethernet frame.
///
/// # Errors
///
/// * [`FormatError::UnexpectedSubtype`] if the frame is not ADP
/// * [`FormatError::MalformedPdu`] if control_data_length is not 56 or the
///   payload is shorter than it declares
/// * [`FormatError::UnknownMessageType`] for message types above DISCOVER
pub fn parse_adpdu(frame: &EthernetFrame) -> Result<Adpdu, FormatError> {
    let data = frame.payload.as_slice();
    let header = CommonControlHeader::decode(data)?;
    if header.subtype != Subtype::Adp {
        return Err(FormatError::UnexpectedSubtype(header.subtype as u8));
    }
    if header.control_data_length != ADPDU_CONTROL_DATA_LENGTH {
        return Err(FormatError::MalformedPdu(format!(
            "ADP control_data_length {} (expected {})",
            header.control_data_length, ADPDU_CONTROL_DATA_LENGTH
        )));
    }
    header.check_control_data(data.len())?;
    let message_type = AdpMessageType::try_from(header.message_type)?;

    Ok(Adpdu {
        source_mac: frame.src_mac,
        message_type,
        valid_time: header.status,
        entity_id: EntityId(header.stream_id),
        entity_model_id: read_u64(data, 12),
        entity_capabilities: EntityCapabilities::from_bits_retain(read_u32(data, 20)),
        talker_stream_sources: read_u16(data, 24),
        talker_capabilities: TalkerCapabilities::from_bits_retain(read_u16(data, 26)),
        listener_stream_sinks: read_u16(data, 28),
        listener_capabilities: ListenerCapabilities::from_bits_retain(read_u16(data, 30)),
        controller_capabilities: ControllerCapabilities::from_bits_retain(read_u32(data, 32)),
        available_index: read_u32(data, 36),
        gptp_grandmaster_id: read_u64(data, 40),
        gptp_domain_number: read_u8(data, 48),
        reserved0: read_u24(data, 49),
        identify_control_index: read_u16(data, 52),
        interface_index: read_u16(data, 54),
        association_id: read_u64(data, 56),
        reserved1: read_u32(data, 64),
    })
}

impl Adpdu {
    pub fn source_mac(&self) -> MacAddress {
        self.source_mac
    }

    pub fn message_type(&self) -> AdpMessageType {
        self.message_type
    }

    /// Raw valid_time field, in two-second units
    pub fn valid_time_units(&self) -> u8 {
        self.valid_time
    }

    /// How long this advertisement stays valid
    pub fn valid_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.valid_time) * 2)
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn entity_model_id(&self) -> u64 {
        self.entity_model_id
    }

    pub fn entity_capabilities(&self) -> EntityCapabilities {
        self.entity_capabilities
    }

    pub fn talker_stream_sources(&self) -> u16 {
        self.talker_stream_sources
    }

    pub fn talker_capabilities(&self) -> TalkerCapabilities {
        self.talker_capabilities
    }

    pub fn listener_stream_sinks(&self) -> u16 {
        self.listener_stream_sinks
    }

    pub fn listener_capabilities(&self) -> ListenerCapabilities {
        self.listener_capabilities
    }

    pub fn controller_capabilities(&self) -> ControllerCapabilities {
        self.controller_capabilities
    }

    pub fn available_index(&self) -> u32 {
        self.available_index
    }

    pub fn gptp_grandmaster_id(&self) -> u64 {
        self.gptp_grandmaster_id
    }

    pub fn gptp_domain_number(&self) -> u8 {
        self.gptp_domain_number
    }

    pub fn reserved0(&self) -> u32 {
        self.reserved0
    }

    pub fn identify_control_index(&self) -> u16 {
        self.identify_control_index
    }

    pub fn interface_index(&self) -> u16 {
        self.interface_index
    }

    pub fn association_id(&self) -> u64 {
        self.association_id
    }

    pub fn reserved1(&self) -> u32 {
        self.reserved1
    }

    /// Whether a controller should leave this entity alone
    pub fn is_ignored(&self) -> bool {
        self.entity_capabilities.intersects(
            EntityCapabilities::GENERAL_CONTROLLER_IGNORE | EntityCapabilities::ENTITY_NOT_READY,
        )
    }

    /// Encode the AVTPDU (header plus control data)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ADPDU_LEN);
        CommonControlHeader::new(
            Subtype::Adp,
            self.message_type as u8,
            self.valid_time,
            ADPDU_CONTROL_DATA_LENGTH,
            self.entity_id.value(),
        )
        .encode(&mut buf);
        buf.put_u64(self.entity_model_id);
        buf.put_u32(self.entity_capabilities.bits());
        buf.put_u16(self.talker_stream_sources);
        buf.put_u16(self.talker_capabilities.bits());
        buf.put_u16(self.listener_stream_sinks);
        buf.put_u16(self.listener_capabilities.bits());
        buf.put_u32(self.controller_capabilities.bits());
        buf.put_u32(self.available_index);
        buf.put_u64(self.gptp_grandmaster_id);
        buf.put_u8(self.gptp_domain_number);
        put_u24(&mut buf, self.reserved0);
        buf.put_u16(self.identify_control_index);
        buf.put_u16(self.interface_index);
        buf.put_u64(self.association_id);
        buf.put_u32(self.reserved1);
        buf
    }

    /// Wrap the ADPDU in a frame addressed to the AVDECC multicast group
    pub fn to_frame(&self) -> EthernetFrame {
        EthernetFrame::multicast(self.source_mac, self.encode())
    }
}

/// The advertised identity and capabilities of an entity.
///
/// Everything in an ENTITY_AVAILABLE message except available_index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityInfo {
    pub entity_id: EntityId,
    pub entity_model_id: u64,
    pub entity_capabilities: EntityCapabilities,
    pub talker_stream_sources: u16,
    pub talker_capabilities: TalkerCapabilities,
    pub listener_stream_sinks: u16,
    pub listener_capabilities: ListenerCapabilities,
    pub controller_capabilities: ControllerCapabilities,
    pub gptp_grandmaster_id: u64,
    pub gptp_domain_number: u8,
    pub identify_control_index: u16,
    pub interface_index: u16,
    pub association_id: u64,
    /// Valid time in two-second units
    pub valid_time: u8,
}

impl EntityInfo {
    pub fn new(entity_id: EntityId, entity_model_id: u64) -> Self {
        Self {
            entity_id,
            entity_model_id,
            entity_capabilities: EntityCapabilities::empty(),
            talker_stream_sources: 0,
            talker_capabilities: TalkerCapabilities::empty(),
            listener_stream_sinks: 0,
            listener_capabilities: ListenerCapabilities::empty(),
            controller_capabilities: ControllerCapabilities::empty(),
            gptp_grandmaster_id: 0,
            gptp_domain_number: 0,
            identify_control_index: 0,
            interface_index: 0,
            association_id: 0,
            valid_time: DEFAULT_VALID_TIME,
        }
    }
}

/// An entity hosted on this end station, i.e. the controller's own identity
/// when it advertises itself.
#[derive(Debug, Clone)]
pub struct LocalEntity {
    pub info: EntityInfo,
    available_index: u32,
    last_available: Option<EntityInfo>,
}

impl LocalEntity {
    pub fn new(info: EntityInfo) -> Self {
        Self {
            info,
            available_index: 0,
            last_available: None,
        }
    }

    /// A local entity advertising controller capability only
    pub fn controller(entity_id: EntityId, entity_model_id: u64) -> Self {
        let mut info = EntityInfo::new(entity_id, entity_model_id);
        info.controller_capabilities = ControllerCapabilities::IMPLEMENTED;
        Self::new(info)
    }

    /// Start from a specific available_index, e.g. one restored after reboot
    pub fn with_available_index(mut self, available_index: u32) -> Self {
        self.available_index = available_index;
        self
    }

    pub fn entity_id(&self) -> EntityId {
        self.info.entity_id
    }

    /// The index that the next unchanged advertisement will carry
    pub fn available_index(&self) -> u32 {
        self.available_index
    }

    fn adpdu(&self, message_type: AdpMessageType, source_mac: MacAddress) -> Adpdu {
        let info = &self.info;
        Adpdu {
            source_mac,
            message_type,
            valid_time: info.valid_time & 0x1F,
            entity_id: info.entity_id,
            entity_model_id: info.entity_model_id,
            entity_capabilities: info.entity_capabilities,
            talker_stream_sources: info.talker_stream_sources,
            talker_capabilities: info.talker_capabilities,
            listener_stream_sinks: info.listener_stream_sinks,
            listener_capabilities: info.listener_capabilities,
            controller_capabilities: info.controller_capabilities,
            available_index: self.available_index,
            gptp_grandmaster_id: info.gptp_grandmaster_id,
            gptp_domain_number: info.gptp_domain_number,
            reserved0: 0,
            identify_control_index: info.identify_control_index,
            interface_index: info.interface_index,
            association_id: info.association_id,
            reserved1: 0,
        }
    }
}

/// Build an ADP frame for a local entity.
///
/// For ENTITY_AVAILABLE, available_index is incremented when the advertised
/// state differs from the previous ENTITY_AVAILABLE; the first advertisement
/// carries the current index. ENTITY_DEPARTING carries the current state
/// unchanged. ENTITY_DISCOVER ignores the entity's state and solicits every
/// entity on the network (see [`build_discover`] for a targeted request).
pub fn build_advertisement(
    entity: &mut LocalEntity,
    message_type: AdpMessageType,
    source_mac: MacAddress,
) -> EthernetFrame {
    match message_type {
        AdpMessageType::EntityAvailable => {
            if let Some(previous) = &entity.last_available {
                if *previous != entity.info {
                    entity.available_index = entity.available_index.wrapping_add(1);
                }
            }
            entity.last_available = Some(entity.info.clone());
            entity.adpdu(message_type, source_mac).to_frame()
        }
        AdpMessageType::EntityDeparting => entity.adpdu(message_type, source_mac).to_frame(),
        AdpMessageType::EntityDiscover => build_discover(EntityId::NULL, source_mac),
    }
}

/// Build an ENTITY_DISCOVER frame. A null target solicits every entity.
pub fn build_discover(target: EntityId, source_mac: MacAddress) -> EthernetFrame {
    let mut info = EntityInfo::new(target, 0);
    info.valid_time = 0;
    LocalEntity::new(info)
        .adpdu(AdpMessageType::EntityDiscover, source_mac)
        .to_frame()
}
