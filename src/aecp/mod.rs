//! AVDECC Enumeration and Control Protocol (AECP), AEM command set
//!
//! AEM commands read and change an entity's descriptors. Every command carries
//! the controller's entity id and a sequence id; the entity answers with a
//! response that echoes both, a status, and (on success) the confirmed values.
//! An entity may also send unsolicited responses (the `u` bit) to notify
//! registered controllers of changes.
//!
//! # AEM PDU Layout
//!
//! | Offset | Field                                 | Size |
//! |-------:|---------------------------------------|-----:|
//! |      0 | common control header (target id)     |   12 |
//! |     12 | controller_entity_id                  |    8 |
//! |     20 | sequence_id                           |    2 |
//! |     22 | u (1 bit) + command_type (15 bits)    |    2 |
//! |     24 | command-specific payload              |  ... |
//!
//! control_data_length counts everything after the header: 12 + payload.

use bytes::{BufMut, Bytes};

use crate::datalink::ethernet::EthernetFrame;
use crate::datalink::MacAddress;
use crate::descriptor::{Descriptor, DescriptorInfo, DescriptorType};
use crate::encoding::{ensure_len, read_u16, read_u32, read_u64};
use crate::error::FormatError;
use crate::generate_custom_enum;
use crate::pdu::{CommonControlHeader, EntityId, Subtype, COMMON_CONTROL_HEADER_LEN};

/// Bytes between the common header and the command payload
pub const AEM_HEADER_LEN: usize = 12;

/// Offset of the command payload from the start of the AVTPDU
pub const AEM_PAYLOAD_OFFSET: usize = COMMON_CONTROL_HEADER_LEN + AEM_HEADER_LEN;

/// AECP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AecpMessageType {
    AemCommand = 0,
    AemResponse = 1,
    AddressAccessCommand = 2,
    AddressAccessResponse = 3,
    AvcCommand = 4,
    AvcResponse = 5,
    VendorUniqueCommand = 6,
    VendorUniqueResponse = 7,
    ExtendedCommand = 14,
    ExtendedResponse = 15,
}

impl TryFrom<u8> for AecpMessageType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => AecpMessageType::AemCommand,
            1 => AecpMessageType::AemResponse,
            2 => AecpMessageType::AddressAccessCommand,
            3 => AecpMessageType::AddressAccessResponse,
            4 => AecpMessageType::AvcCommand,
            5 => AecpMessageType::AvcResponse,
            6 => AecpMessageType::VendorUniqueCommand,
            7 => AecpMessageType::VendorUniqueResponse,
            14 => AecpMessageType::ExtendedCommand,
            15 => AecpMessageType::ExtendedResponse,
            value => {
                return Err(FormatError::UnknownMessageType {
                    protocol: "AECP",
                    value,
                })
            }
        })
    }
}

generate_custom_enum!(
    /// AEM command types (IEEE 1722.1-2013 Table 7.126)
    AemCommandType {
        AcquireEntity = 0x0000,
        LockEntity = 0x0001,
        EntityAvailable = 0x0002,
        ControllerAvailable = 0x0003,
        ReadDescriptor = 0x0004,
        WriteDescriptor = 0x0005,
        SetConfiguration = 0x0006,
        GetConfiguration = 0x0007,
        SetStreamFormat = 0x0008,
        GetStreamFormat = 0x0009,
        SetVideoFormat = 0x000A,
        GetVideoFormat = 0x000B,
        SetSensorFormat = 0x000C,
        GetSensorFormat = 0x000D,
        SetStreamInfo = 0x000E,
        GetStreamInfo = 0x000F,
        SetName = 0x0010,
        GetName = 0x0011,
        SetAssociationId = 0x0012,
        GetAssociationId = 0x0013,
        SetSamplingRate = 0x0014,
        GetSamplingRate = 0x0015,
        SetClockSource = 0x0016,
        GetClockSource = 0x0017,
        SetControl = 0x0018,
        GetControl = 0x0019,
        IncrementControl = 0x001A,
        DecrementControl = 0x001B,
        SetSignalSelector = 0x001C,
        GetSignalSelector = 0x001D,
        SetMixer = 0x001E,
        GetMixer = 0x001F,
        SetMatrix = 0x0020,
        GetMatrix = 0x0021,
        StartStreaming = 0x0022,
        StopStreaming = 0x0023,
        RegisterUnsolicitedNotification = 0x0024,
        DeregisterUnsolicitedNotification = 0x0025,
        IdentifyNotification = 0x0026,
        GetAvbInfo = 0x0027,
        GetAsPath = 0x0028,
        GetCounters = 0x0029,
        Reboot = 0x002A,
        GetAudioMap = 0x002B,
        AddAudioMappings = 0x002C,
        RemoveAudioMappings = 0x002D,
        Expansion = 0x7FFF,
    },
    u16,
    0x002E..=0x7FFE
);

generate_custom_enum!(
    /// AEM response status codes (IEEE 1722.1-2013 Table 7.127)
    AemStatus {
        Success = 0,
        NotImplemented = 1,
        NoSuchDescriptor = 2,
        EntityLocked = 3,
        EntityAcquired = 4,
        NotAuthenticated = 5,
        AuthenticationDisabled = 6,
        BadArguments = 7,
        NoResources = 8,
        InProgress = 9,
        EntityMisbehaving = 10,
        NotSupported = 11,
        StreamIsRunning = 12,
    },
    u8,
    13..=31
);

/// A decoded AEM command or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AemPdu {
    pub message_type: AecpMessageType,
    pub status: AemStatus,
    pub target_entity_id: EntityId,
    pub controller_entity_id: EntityId,
    pub sequence_id: u16,
    pub unsolicited: bool,
    pub command_type: AemCommandType,
    pub payload: Bytes,
}

impl AemPdu {
    /// Build an AEM command
    pub fn command(
        target_entity_id: EntityId,
        controller_entity_id: EntityId,
        sequence_id: u16,
        command: &AemCommand,
    ) -> Self {
        Self {
            message_type: AecpMessageType::AemCommand,
            status: AemStatus::Success,
            target_entity_id,
            controller_entity_id,
            sequence_id,
            unsolicited: false,
            command_type: command.command_type(),
            payload: Bytes::from(command.encode_payload()),
        }
    }

    /// Build the response to this command, as an entity would
    pub fn response(&self, status: AemStatus, payload: Vec<u8>) -> Self {
        Self {
            message_type: AecpMessageType::AemResponse,
            status,
            payload: Bytes::from(payload),
            ..self.clone()
        }
    }

    pub fn is_response(&self) -> bool {
        self.message_type == AecpMessageType::AemResponse
    }

    /// Decode an AEM PDU from an AVTPDU.
    ///
    /// Fails with [`FormatError::UnexpectedSubtype`] for non-AECP data and
    /// [`FormatError::MalformedPdu`] when the control data is too short for the
    /// AEM header or longer than the buffer.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let header = CommonControlHeader::decode(data)?;
        if header.subtype != Subtype::Aecp {
            return Err(FormatError::UnexpectedSubtype(header.subtype as u8));
        }
        let message_type = AecpMessageType::try_from(header.message_type)?;
        if !matches!(
            message_type,
            AecpMessageType::AemCommand | AecpMessageType::AemResponse
        ) {
            return Err(FormatError::MalformedPdu(format!(
                "{:?} is not an AEM message",
                message_type
            )));
        }
        let control_data_length = header.control_data_length as usize;
        if control_data_length < AEM_HEADER_LEN {
            return Err(FormatError::MalformedPdu(format!(
                "AEM control_data_length {} is shorter than the AEM header",
                control_data_length
            )));
        }
        header.check_control_data(data.len())?;

        let command_word = read_u16(data, 22);
        let end = COMMON_CONTROL_HEADER_LEN + control_data_length;
        Ok(Self {
            message_type,
            status: AemStatus::from(header.status),
            target_entity_id: EntityId(header.stream_id),
            controller_entity_id: EntityId(read_u64(data, 12)),
            sequence_id: read_u16(data, 20),
            unsolicited: command_word & 0x8000 != 0,
            command_type: AemCommandType::from(command_word & 0x7FFF),
            payload: Bytes::copy_from_slice(&data[AEM_PAYLOAD_OFFSET..end]),
        })
    }

    /// Encode the AVTPDU
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AEM_PAYLOAD_OFFSET + self.payload.len());
        CommonControlHeader::new(
            Subtype::Aecp,
            self.message_type as u8,
            u8::from(self.status),
            (AEM_HEADER_LEN + self.payload.len()) as u16,
            self.target_entity_id.value(),
        )
        .encode(&mut buf);
        buf.put_u64(self.controller_entity_id.value());
        buf.put_u16(self.sequence_id);
        let command_type = u16::from(self.command_type) & 0x7FFF;
        buf.put_u16(if self.unsolicited { command_type | 0x8000 } else { command_type });
        buf.put_slice(&self.payload);
        buf
    }

    pub fn to_frame(&self, dest_mac: MacAddress, src_mac: MacAddress) -> EthernetFrame {
        EthernetFrame::new(dest_mac, src_mac, self.encode())
    }
}

/// AEM commands a controller can issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AemCommand {
    ControllerAvailable,
    ReadDescriptor {
        configuration_index: u16,
        descriptor_type: DescriptorType,
        descriptor_index: u16,
    },
    SetClockSource {
        clock_domain_index: u16,
        clock_source_index: u16,
    },
    GetClockSource {
        clock_domain_index: u16,
    },
    SetSamplingRate {
        audio_unit_index: u16,
        sampling_rate: u32,
    },
    GetSamplingRate {
        audio_unit_index: u16,
    },
    SetStreamFormat {
        descriptor_type: DescriptorType,
        descriptor_index: u16,
        stream_format: u64,
    },
    GetStreamFormat {
        descriptor_type: DescriptorType,
        descriptor_index: u16,
    },
}

impl AemCommand {
    pub fn command_type(&self) -> AemCommandType {
        match self {
            AemCommand::ControllerAvailable => AemCommandType::ControllerAvailable,
            AemCommand::ReadDescriptor { .. } => AemCommandType::ReadDescriptor,
            AemCommand::SetClockSource { .. } => AemCommandType::SetClockSource,
            AemCommand::GetClockSource { .. } => AemCommandType::GetClockSource,
            AemCommand::SetSamplingRate { .. } => AemCommandType::SetSamplingRate,
            AemCommand::GetSamplingRate { .. } => AemCommandType::GetSamplingRate,
            AemCommand::SetStreamFormat { .. } => AemCommandType::SetStreamFormat,
            AemCommand::GetStreamFormat { .. } => AemCommandType::GetStreamFormat,
        }
    }

    /// The descriptor this command addresses, if any
    pub fn target(&self) -> Option<(DescriptorType, u16)> {
        match *self {
            AemCommand::ControllerAvailable => None,
            AemCommand::ReadDescriptor {
                descriptor_type,
                descriptor_index,
                ..
            } => Some((descriptor_type, descriptor_index)),
            AemCommand::SetClockSource {
                clock_domain_index, ..
            }
            | AemCommand::GetClockSource { clock_domain_index } => {
                Some((DescriptorType::ClockDomain, clock_domain_index))
            }
            AemCommand::SetSamplingRate {
                audio_unit_index, ..
            }
            | AemCommand::GetSamplingRate { audio_unit_index } => {
                Some((DescriptorType::AudioUnit, audio_unit_index))
            }
            AemCommand::SetStreamFormat {
                descriptor_type,
                descriptor_index,
                ..
            }
            | AemCommand::GetStreamFormat {
                descriptor_type,
                descriptor_index,
            } => Some((descriptor_type, descriptor_index)),
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        match *self {
            AemCommand::ControllerAvailable => {}
            AemCommand::ReadDescriptor {
                configuration_index,
                descriptor_type,
                descriptor_index,
            } => {
                buf.put_u16(configuration_index);
                buf.put_u16(0);
                buf.put_u16(descriptor_type.into());
                buf.put_u16(descriptor_index);
            }
            AemCommand::SetClockSource {
                clock_domain_index,
                clock_source_index,
            } => {
                buf.put_u16(DescriptorType::ClockDomain.into());
                buf.put_u16(clock_domain_index);
                buf.put_u16(clock_source_index);
                buf.put_u16(0);
            }
            AemCommand::GetClockSource { clock_domain_index } => {
                buf.put_u16(DescriptorType::ClockDomain.into());
                buf.put_u16(clock_domain_index);
            }
            AemCommand::SetSamplingRate {
                audio_unit_index,
                sampling_rate,
            } => {
                buf.put_u16(DescriptorType::AudioUnit.into());
                buf.put_u16(audio_unit_index);
                buf.put_u32(sampling_rate);
            }
            AemCommand::GetSamplingRate { audio_unit_index } => {
                buf.put_u16(DescriptorType::AudioUnit.into());
                buf.put_u16(audio_unit_index);
            }
            AemCommand::SetStreamFormat {
                descriptor_type,
                descriptor_index,
                stream_format,
            } => {
                buf.put_u16(descriptor_type.into());
                buf.put_u16(descriptor_index);
                buf.put_u64(stream_format);
            }
            AemCommand::GetStreamFormat {
                descriptor_type,
                descriptor_index,
            } => {
                buf.put_u16(descriptor_type.into());
                buf.put_u16(descriptor_index);
            }
        }
        buf
    }

    /// Decode a command payload, as an entity receiving it would
    pub fn decode(command_type: AemCommandType, payload: &[u8]) -> Result<Self, FormatError> {
        let descriptor = |payload: &[u8]| -> Result<(DescriptorType, u16), FormatError> {
            ensure_len(payload, 4)?;
            Ok((DescriptorType::from(read_u16(payload, 0)), read_u16(payload, 2)))
        };
        Ok(match command_type {
            AemCommandType::ControllerAvailable => AemCommand::ControllerAvailable,
            AemCommandType::ReadDescriptor => {
                ensure_len(payload, 8)?;
                AemCommand::ReadDescriptor {
                    configuration_index: read_u16(payload, 0),
                    descriptor_type: DescriptorType::from(read_u16(payload, 4)),
                    descriptor_index: read_u16(payload, 6),
                }
            }
            AemCommandType::SetClockSource => {
                ensure_len(payload, 6)?;
                AemCommand::SetClockSource {
                    clock_domain_index: read_u16(payload, 2),
                    clock_source_index: read_u16(payload, 4),
                }
            }
            AemCommandType::GetClockSource => AemCommand::GetClockSource {
                clock_domain_index: descriptor(payload)?.1,
            },
            AemCommandType::SetSamplingRate => {
                ensure_len(payload, 8)?;
                AemCommand::SetSamplingRate {
                    audio_unit_index: read_u16(payload, 2),
                    sampling_rate: read_u32(payload, 4),
                }
            }
            AemCommandType::GetSamplingRate => AemCommand::GetSamplingRate {
                audio_unit_index: descriptor(payload)?.1,
            },
            AemCommandType::SetStreamFormat => {
                ensure_len(payload, 12)?;
                let (descriptor_type, descriptor_index) = descriptor(payload)?;
                AemCommand::SetStreamFormat {
                    descriptor_type,
                    descriptor_index,
                    stream_format: read_u64(payload, 4),
                }
            }
            AemCommandType::GetStreamFormat => {
                let (descriptor_type, descriptor_index) = descriptor(payload)?;
                AemCommand::GetStreamFormat {
                    descriptor_type,
                    descriptor_index,
                }
            }
            other => {
                return Err(FormatError::MalformedPdu(format!(
                    "unsupported AEM command {}",
                    other
                )))
            }
        })
    }
}

/// Payload of a successful AEM response
#[derive(Debug, Clone, PartialEq)]
pub enum AemResponse {
    ControllerAvailable,
    ReadDescriptor {
        configuration_index: u16,
        descriptor: Descriptor,
    },
    /// SET_CLOCK_SOURCE or GET_CLOCK_SOURCE
    ClockSource {
        clock_domain_index: u16,
        clock_source_index: u16,
    },
    /// SET_SAMPLING_RATE or GET_SAMPLING_RATE
    SamplingRate {
        descriptor_type: DescriptorType,
        descriptor_index: u16,
        sampling_rate: u32,
    },
    /// SET_STREAM_FORMAT or GET_STREAM_FORMAT
    StreamFormat {
        descriptor_type: DescriptorType,
        descriptor_index: u16,
        stream_format: u64,
    },
    /// Any other command, payload left undecoded
    Other {
        command_type: AemCommandType,
        payload: Bytes,
    },
}

impl AemResponse {
    pub fn decode(command_type: AemCommandType, payload: &Bytes) -> Result<Self, FormatError> {
        Ok(match command_type {
            AemCommandType::ControllerAvailable => AemResponse::ControllerAvailable,
            AemCommandType::ReadDescriptor => {
                ensure_len(payload, 4)?;
                AemResponse::ReadDescriptor {
                    configuration_index: read_u16(payload, 0),
                    descriptor: Descriptor::decode(&payload[4..])?,
                }
            }
            AemCommandType::SetClockSource | AemCommandType::GetClockSource => {
                ensure_len(payload, 6)?;
                AemResponse::ClockSource {
                    clock_domain_index: read_u16(payload, 2),
                    clock_source_index: read_u16(payload, 4),
                }
            }
            AemCommandType::SetSamplingRate | AemCommandType::GetSamplingRate => {
                ensure_len(payload, 8)?;
                AemResponse::SamplingRate {
                    descriptor_type: DescriptorType::from(read_u16(payload, 0)),
                    descriptor_index: read_u16(payload, 2),
                    sampling_rate: read_u32(payload, 4),
                }
            }
            AemCommandType::SetStreamFormat | AemCommandType::GetStreamFormat => {
                ensure_len(payload, 12)?;
                AemResponse::StreamFormat {
                    descriptor_type: DescriptorType::from(read_u16(payload, 0)),
                    descriptor_index: read_u16(payload, 2),
                    stream_format: read_u64(payload, 4),
                }
            }
            command_type => AemResponse::Other {
                command_type,
                payload: payload.clone(),
            },
        })
    }

    /// The descriptor the response reports on, comparable with
    /// [`AemCommand::target`]
    pub fn target(&self) -> Option<(DescriptorType, u16)> {
        match self {
            AemResponse::ControllerAvailable | AemResponse::Other { .. } => None,
            AemResponse::ReadDescriptor { descriptor, .. } => {
                Some((descriptor.descriptor_type(), descriptor.descriptor_index()))
            }
            AemResponse::ClockSource {
                clock_domain_index, ..
            } => Some((DescriptorType::ClockDomain, *clock_domain_index)),
            AemResponse::SamplingRate {
                descriptor_type,
                descriptor_index,
                ..
            }
            | AemResponse::StreamFormat {
                descriptor_type,
                descriptor_index,
                ..
            } => Some((*descriptor_type, *descriptor_index)),
        }
    }

    /// Encode as the payload of a response PDU
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            AemResponse::ControllerAvailable => {}
            AemResponse::ReadDescriptor {
                configuration_index,
                descriptor,
            } => {
                buf.put_u16(*configuration_index);
                buf.put_u16(0);
                buf.put_slice(&descriptor.encode());
            }
            AemResponse::ClockSource {
                clock_domain_index,
                clock_source_index,
            } => {
                buf.put_u16(DescriptorType::ClockDomain.into());
                buf.put_u16(*clock_domain_index);
                buf.put_u16(*clock_source_index);
                buf.put_u16(0);
            }
            AemResponse::SamplingRate {
                descriptor_type,
                descriptor_index,
                sampling_rate,
            } => {
                buf.put_u16((*descriptor_type).into());
                buf.put_u16(*descriptor_index);
                buf.put_u32(*sampling_rate);
            }
            AemResponse::StreamFormat {
                descriptor_type,
                descriptor_index,
                stream_format,
            } => {
                buf.put_u16((*descriptor_type).into());
                buf.put_u16(*descriptor_index);
                buf.put_u64(*stream_format);
            }
            AemResponse::Other { payload, .. } => buf.put_slice(payload),
        }
        buf
    }
}
