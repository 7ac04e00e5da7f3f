//! AVDECC Connection Management Protocol (ACMP)
//!
//! A controller connects a listener's stream input to a talker's stream output
//! by sending CONNECT_RX to the listener, which then talks to the talker
//! itself. All ACMP messages go to the AVDECC multicast address; the response
//! is recognised by the responding entity's id, our controller id and the
//! sequence id.
//!
//! # ACMPDU Layout
//!
//! | Offset | Field                     | Size |
//! |-------:|---------------------------|-----:|
//! |      0 | common header (stream_id) |   12 |
//! |     12 | controller_entity_id      |    8 |
//! |     20 | talker_entity_id          |    8 |
//! |     28 | listener_entity_id        |    8 |
//! |     36 | talker_unique_id          |    2 |
//! |     38 | listener_unique_id        |    2 |
//! |     40 | stream_dest_mac           |    6 |
//! |     46 | connection_count          |    2 |
//! |     48 | sequence_id               |    2 |
//! |     50 | flags                     |    2 |
//! |     52 | stream_vlan_id            |    2 |
//! |     54 | reserved                  |    2 |

use std::time::Duration;

use bitflags::bitflags;
use bytes::BufMut;

use crate::datalink::ethernet::EthernetFrame;
use crate::datalink::MacAddress;
use crate::descriptor::DescriptorType;
use crate::encoding::{read_mac, read_u16, read_u64};
use crate::error::FormatError;
use crate::generate_custom_enum;
use crate::pdu::{CommonControlHeader, EntityId, Subtype};

pub const ACMPDU_CONTROL_DATA_LENGTH: u16 = 44;

pub const ACMPDU_LEN: usize = 56;

/// ACMP message types (IEEE 1722.1-2013 Table 8.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AcmpMessageType {
    ConnectTxCommand = 0,
    ConnectTxResponse = 1,
    DisconnectTxCommand = 2,
    DisconnectTxResponse = 3,
    GetTxStateCommand = 4,
    GetTxStateResponse = 5,
    ConnectRxCommand = 6,
    ConnectRxResponse = 7,
    DisconnectRxCommand = 8,
    DisconnectRxResponse = 9,
    GetRxStateCommand = 10,
    GetRxStateResponse = 11,
    GetTxConnectionCommand = 12,
    GetTxConnectionResponse = 13,
}

impl AcmpMessageType {
    /// Responses have odd message type values
    pub fn is_response(&self) -> bool {
        (*self as u8) & 1 == 1
    }

    /// The response type paired with a command, or itself for a response
    pub fn response_type(&self) -> AcmpMessageType {
        match self {
            AcmpMessageType::ConnectTxCommand => AcmpMessageType::ConnectTxResponse,
            AcmpMessageType::DisconnectTxCommand => AcmpMessageType::DisconnectTxResponse,
            AcmpMessageType::GetTxStateCommand => AcmpMessageType::GetTxStateResponse,
            AcmpMessageType::ConnectRxCommand => AcmpMessageType::ConnectRxResponse,
            AcmpMessageType::DisconnectRxCommand => AcmpMessageType::DisconnectRxResponse,
            AcmpMessageType::GetRxStateCommand => AcmpMessageType::GetRxStateResponse,
            AcmpMessageType::GetTxConnectionCommand => AcmpMessageType::GetTxConnectionResponse,
            response => *response,
        }
    }

    /// The command type paired with a response, or itself for a command
    pub fn command_type(&self) -> AcmpMessageType {
        match self {
            AcmpMessageType::ConnectTxResponse => AcmpMessageType::ConnectTxCommand,
            AcmpMessageType::DisconnectTxResponse => AcmpMessageType::DisconnectTxCommand,
            AcmpMessageType::GetTxStateResponse => AcmpMessageType::GetTxStateCommand,
            AcmpMessageType::ConnectRxResponse => AcmpMessageType::ConnectRxCommand,
            AcmpMessageType::DisconnectRxResponse => AcmpMessageType::DisconnectRxCommand,
            AcmpMessageType::GetRxStateResponse => AcmpMessageType::GetRxStateCommand,
            AcmpMessageType::GetTxConnectionResponse => AcmpMessageType::GetTxConnectionCommand,
            command => *command,
        }
    }

    /// Whether the listener (rather than the talker) answers this message
    pub fn is_listener_message(&self) -> bool {
        matches!(
            self.command_type(),
            AcmpMessageType::ConnectRxCommand
                | AcmpMessageType::DisconnectRxCommand
                | AcmpMessageType::GetRxStateCommand
        )
    }

    /// Command timeout (IEEE 1722.1-2013 Table 8.2)
    pub fn default_timeout(&self) -> Duration {
        let millis = match self.command_type() {
            AcmpMessageType::ConnectTxCommand => 2000,
            AcmpMessageType::ConnectRxCommand => 4500,
            AcmpMessageType::DisconnectRxCommand => 500,
            _ => 200,
        };
        Duration::from_millis(millis)
    }
}

impl TryFrom<u8> for AcmpMessageType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => AcmpMessageType::ConnectTxCommand,
            1 => AcmpMessageType::ConnectTxResponse,
            2 => AcmpMessageType::DisconnectTxCommand,
            3 => AcmpMessageType::DisconnectTxResponse,
            4 => AcmpMessageType::GetTxStateCommand,
            5 => AcmpMessageType::GetTxStateResponse,
            6 => AcmpMessageType::ConnectRxCommand,
            7 => AcmpMessageType::ConnectRxResponse,
            8 => AcmpMessageType::DisconnectRxCommand,
            9 => AcmpMessageType::DisconnectRxResponse,
            10 => AcmpMessageType::GetRxStateCommand,
            11 => AcmpMessageType::GetRxStateResponse,
            12 => AcmpMessageType::GetTxConnectionCommand,
            13 => AcmpMessageType::GetTxConnectionResponse,
            value => {
                return Err(FormatError::UnknownMessageType {
                    protocol: "ACMP",
                    value,
                })
            }
        })
    }
}

impl std::fmt::Display for AcmpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

generate_custom_enum!(
    /// ACMP status codes (IEEE 1722.1-2013 Table 8.3)
    AcmpStatus {
        Success = 0,
        ListenerUnknownId = 1,
        TalkerUnknownId = 2,
        TalkerDestMacFail = 3,
        TalkerNoStreamIndex = 4,
        TalkerNoBandwidth = 5,
        TalkerExclusive = 6,
        ListenerTalkerTimeout = 7,
        ListenerExclusive = 8,
        StateUnavailable = 9,
        NotConnected = 10,
        NoSuchConnection = 11,
        CouldNotSendMessage = 12,
        TalkerMisbehaving = 13,
        ListenerMisbehaving = 14,
        ControllerNotAuthorized = 16,
        IncompatibleRequest = 17,
        NotSupported = 31,
    },
    u8,
    18..=30
);

bitflags! {
    /// ACMPDU flags field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AcmpFlags: u16 {
        const CLASS_B = 0x0001;
        const FAST_CONNECT = 0x0002;
        const SAVED_STATE = 0x0004;
        const STREAMING_WAIT = 0x0008;
        const SUPPORTS_ENCRYPTED = 0x0010;
        const ENCRYPTED_PDU = 0x0020;
        const TALKER_FAILED = 0x0040;

        const _ = !0;
    }
}

/// A decoded ACMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acmpdu {
    pub message_type: AcmpMessageType,
    pub status: AcmpStatus,
    pub stream_id: u64,
    pub controller_entity_id: EntityId,
    pub talker_entity_id: EntityId,
    pub listener_entity_id: EntityId,
    pub talker_unique_id: u16,
    pub listener_unique_id: u16,
    pub stream_dest_mac: MacAddress,
    pub connection_count: u16,
    pub sequence_id: u16,
    pub flags: AcmpFlags,
    pub stream_vlan_id: u16,
    pub reserved: u16,
}

impl Acmpdu {
    /// Decode an ACMPDU. The control data length must be 44.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let header = CommonControlHeader::decode(data)?;
        if header.subtype != Subtype::Acmp {
            return Err(FormatError::UnexpectedSubtype(header.subtype as u8));
        }
        if header.control_data_length != ACMPDU_CONTROL_DATA_LENGTH {
            return Err(FormatError::MalformedPdu(format!(
                "ACMPDU control_data_length {} (expected {})",
                header.control_data_length, ACMPDU_CONTROL_DATA_LENGTH
            )));
        }
        header.check_control_data(data.len())?;

        Ok(Self {
            message_type: AcmpMessageType::try_from(header.message_type)?,
            status: AcmpStatus::from(header.status),
            stream_id: header.stream_id,
            controller_entity_id: EntityId(read_u64(data, 12)),
            talker_entity_id: EntityId(read_u64(data, 20)),
            listener_entity_id: EntityId(read_u64(data, 28)),
            talker_unique_id: read_u16(data, 36),
            listener_unique_id: read_u16(data, 38),
            stream_dest_mac: read_mac(data, 40),
            connection_count: read_u16(data, 46),
            sequence_id: read_u16(data, 48),
            flags: AcmpFlags::from_bits_retain(read_u16(data, 50)),
            stream_vlan_id: read_u16(data, 52),
            reserved: read_u16(data, 54),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACMPDU_LEN);
        CommonControlHeader::new(
            Subtype::Acmp,
            self.message_type as u8,
            u8::from(self.status),
            ACMPDU_CONTROL_DATA_LENGTH,
            self.stream_id,
        )
        .encode(&mut buf);
        buf.put_u64(self.controller_entity_id.value());
        buf.put_u64(self.talker_entity_id.value());
        buf.put_u64(self.listener_entity_id.value());
        buf.put_u16(self.talker_unique_id);
        buf.put_u16(self.listener_unique_id);
        buf.put_slice(&self.stream_dest_mac);
        buf.put_u16(self.connection_count);
        buf.put_u16(self.sequence_id);
        buf.put_u16(self.flags.bits());
        buf.put_u16(self.stream_vlan_id);
        buf.put_u16(self.reserved);
        buf
    }

    /// Multicast frame carrying this PDU
    pub fn to_frame(&self, src_mac: MacAddress) -> EthernetFrame {
        EthernetFrame::multicast(src_mac, self.encode())
    }

    /// The entity that answers this message: the listener for RX messages,
    /// the talker otherwise
    pub fn responder(&self) -> EntityId {
        if self.message_type.is_listener_message() {
            self.listener_entity_id
        } else {
            self.talker_entity_id
        }
    }

    /// Build the response to this command, as the responder would
    pub fn response(&self, status: AcmpStatus) -> Self {
        Self {
            message_type: self.message_type.response_type(),
            status,
            ..self.clone()
        }
    }
}

/// ACMP commands a controller can issue
///
/// The target entity passed to `Controller::send` is the listener for RX
/// commands and the talker for TX commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcmpCommand {
    ConnectRx {
        talker_entity_id: EntityId,
        talker_unique_id: u16,
        listener_unique_id: u16,
        flags: AcmpFlags,
    },
    DisconnectRx {
        talker_entity_id: EntityId,
        talker_unique_id: u16,
        listener_unique_id: u16,
    },
    GetRxState {
        listener_unique_id: u16,
    },
    GetTxState {
        talker_unique_id: u16,
    },
    GetTxConnection {
        talker_unique_id: u16,
        connection_index: u16,
    },
}

impl AcmpCommand {
    pub fn message_type(&self) -> AcmpMessageType {
        match self {
            AcmpCommand::ConnectRx { .. } => AcmpMessageType::ConnectRxCommand,
            AcmpCommand::DisconnectRx { .. } => AcmpMessageType::DisconnectRxCommand,
            AcmpCommand::GetRxState { .. } => AcmpMessageType::GetRxStateCommand,
            AcmpCommand::GetTxState { .. } => AcmpMessageType::GetTxStateCommand,
            AcmpCommand::GetTxConnection { .. } => AcmpMessageType::GetTxConnectionCommand,
        }
    }

    /// The stream this command addresses on the target entity
    pub fn target(&self) -> (DescriptorType, u16) {
        match *self {
            AcmpCommand::ConnectRx {
                listener_unique_id, ..
            }
            | AcmpCommand::DisconnectRx {
                listener_unique_id, ..
            }
            | AcmpCommand::GetRxState { listener_unique_id } => {
                (DescriptorType::StreamInput, listener_unique_id)
            }
            AcmpCommand::GetTxState { talker_unique_id }
            | AcmpCommand::GetTxConnection {
                talker_unique_id, ..
            } => (DescriptorType::StreamOutput, talker_unique_id),
        }
    }

    /// Build the ACMPDU sent to `target`
    pub fn to_pdu(&self, target: EntityId, controller_entity_id: EntityId, sequence_id: u16) -> Acmpdu {
        let mut pdu = Acmpdu {
            message_type: self.message_type(),
            status: AcmpStatus::Success,
            stream_id: 0,
            controller_entity_id,
            talker_entity_id: EntityId::NULL,
            listener_entity_id: EntityId::NULL,
            talker_unique_id: 0,
            listener_unique_id: 0,
            stream_dest_mac: [0; 6],
            connection_count: 0,
            sequence_id,
            flags: AcmpFlags::empty(),
            stream_vlan_id: 0,
            reserved: 0,
        };
        match *self {
            AcmpCommand::ConnectRx {
                talker_entity_id,
                talker_unique_id,
                listener_unique_id,
                flags,
            } => {
                pdu.talker_entity_id = talker_entity_id;
                pdu.talker_unique_id = talker_unique_id;
                pdu.listener_entity_id = target;
                pdu.listener_unique_id = listener_unique_id;
                pdu.flags = flags;
            }
            AcmpCommand::DisconnectRx {
                talker_entity_id,
                talker_unique_id,
                listener_unique_id,
            } => {
                pdu.talker_entity_id = talker_entity_id;
                pdu.talker_unique_id = talker_unique_id;
                pdu.listener_entity_id = target;
                pdu.listener_unique_id = listener_unique_id;
            }
            AcmpCommand::GetRxState { listener_unique_id } => {
                pdu.listener_entity_id = target;
                pdu.listener_unique_id = listener_unique_id;
            }
            AcmpCommand::GetTxState { talker_unique_id } => {
                pdu.talker_entity_id = target;
                pdu.talker_unique_id = talker_unique_id;
            }
            AcmpCommand::GetTxConnection {
                talker_unique_id,
                connection_index,
            } => {
                pdu.talker_entity_id = target;
                pdu.talker_unique_id = talker_unique_id;
                pdu.connection_count = connection_index;
            }
        }
        pdu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TALKER: EntityId = EntityId(0x0001_0203_0405_0607);
    const LISTENER: EntityId = EntityId(0x1011_1213_1415_1617);
    const CONTROLLER: EntityId = EntityId(0x2021_2223_2425_2627);

    #[test]
    fn test_connect_rx_layout() {
        let command = AcmpCommand::ConnectRx {
            talker_entity_id: TALKER,
            talker_unique_id: 1,
            listener_unique_id: 2,
            flags: AcmpFlags::FAST_CONNECT,
        };
        let pdu = command.to_pdu(LISTENER, CONTROLLER, 0x0102);
        let data = pdu.encode();

        assert_eq!(data.len(), ACMPDU_LEN);
        assert_eq!(data[0], 0xFC);
        assert_eq!(data[1] & 0x0F, 6);
        assert_eq!(read_u16(&data, 2), 44);
        assert_eq!(read_u64(&data, 12), CONTROLLER.value());
        assert_eq!(read_u64(&data, 20), TALKER.value());
        assert_eq!(read_u64(&data, 28), LISTENER.value());
        assert_eq!(read_u16(&data, 36), 1);
        assert_eq!(read_u16(&data, 38), 2);
        assert_eq!(read_u16(&data, 48), 0x0102);
        assert_eq!(read_u16(&data, 50), 0x0002);

        let decoded = Acmpdu::decode(&data).unwrap();
        assert_eq!(decoded, pdu);
        assert_eq!(decoded.responder(), LISTENER);
        assert_eq!(command.target(), (DescriptorType::StreamInput, 2));
    }

    #[test]
    fn test_response_pairing() {
        let pdu = AcmpCommand::GetTxState { talker_unique_id: 0 }.to_pdu(TALKER, CONTROLLER, 7);
        let mut response = pdu.response(AcmpStatus::TalkerNoStreamIndex);
        response.stream_id = 0xAABB;
        response.flags = AcmpFlags::from_bits_retain(0x8001);

        let decoded = Acmpdu::decode(&response.encode()).unwrap();
        assert_eq!(decoded.message_type, AcmpMessageType::GetTxStateResponse);
        assert!(decoded.message_type.is_response());
        assert_eq!(decoded.status, AcmpStatus::TalkerNoStreamIndex);
        assert_eq!(decoded.responder(), TALKER);
        assert_eq!(decoded.stream_id, 0xAABB);
        assert_eq!(decoded.flags.bits(), 0x8001);
        assert!(decoded.flags.contains(AcmpFlags::CLASS_B));
    }

    #[test]
    fn test_message_type_timeouts() {
        assert_eq!(
            AcmpMessageType::ConnectRxCommand.default_timeout(),
            Duration::from_millis(4500)
        );
        assert_eq!(
            AcmpMessageType::DisconnectRxResponse.default_timeout(),
            Duration::from_millis(500)
        );
        assert_eq!(
            AcmpMessageType::ConnectTxCommand.default_timeout(),
            Duration::from_millis(2000)
        );
        assert_eq!(
            AcmpMessageType::GetTxConnectionCommand.default_timeout(),
            Duration::from_millis(200)
        );
        assert_eq!(
            AcmpMessageType::GetRxStateResponse.command_type(),
            AcmpMessageType::GetRxStateCommand
        );
        assert!(!AcmpMessageType::GetTxStateCommand.is_listener_message());
    }

    #[test]
    fn test_malformed_acmpdus() {
        let data = AcmpCommand::GetRxState {
            listener_unique_id: 0,
        }
        .to_pdu(LISTENER, CONTROLLER, 1)
        .encode();

        assert!(matches!(
            Acmpdu::decode(&data[..50]),
            Err(FormatError::MalformedPdu(_))
        ));

        let mut wrong_length = data.clone();
        wrong_length[3] = 40;
        assert!(matches!(
            Acmpdu::decode(&wrong_length),
            Err(FormatError::MalformedPdu(_))
        ));

        let mut unknown_type = data;
        unknown_type[1] = 14;
        assert_eq!(
            Acmpdu::decode(&unknown_type),
            Err(FormatError::UnknownMessageType {
                protocol: "ACMP",
                value: 14
            })
        );
    }

    #[test]
    fn test_status_values() {
        assert_eq!(AcmpStatus::from(17u8), AcmpStatus::IncompatibleRequest);
        assert_eq!(u8::from(AcmpStatus::NotSupported), 31);
        assert!(matches!(AcmpStatus::from(15u8), AcmpStatus::Reserved(_)));
        assert!(matches!(AcmpStatus::from(20u8), AcmpStatus::Custom(_)));
    }
}
