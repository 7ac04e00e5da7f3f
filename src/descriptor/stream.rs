//! STREAM_INPUT / STREAM_OUTPUT descriptors (IEEE 1722.1-2013 7.2.6)

use bitflags::bitflags;
use bytes::BufMut;

use super::{check_fixed, check_list, DescriptorInfo, DescriptorType, Result};
use crate::encoding::{put_string, read_string, read_u16, read_u32, read_u64, AEM_STRING_LEN};
use crate::error::FormatError;
use crate::pdu::EntityId;

pub const STREAM_DESCRIPTOR_LEN: usize = 132;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct StreamFlags: u16 {
        const CLOCK_SYNC_SOURCE = 1 << 0;
        const CLASS_A = 1 << 1;
        const CLASS_B = 1 << 2;
        const SUPPORTS_ENCRYPTED = 1 << 3;
        const PRIMARY_BACKUP_SUPPORTED = 1 << 4;
        const PRIMARY_BACKUP_VALID = 1 << 5;
        const SECONDARY_BACKUP_SUPPORTED = 1 << 6;
        const SECONDARY_BACKUP_VALID = 1 << 7;
        const TERTIARY_BACKUP_SUPPORTED = 1 << 8;
        const TERTIARY_BACKUP_VALID = 1 << 9;

        const _ = !0;
    }
}

/// A stream sink (STREAM_INPUT) or source (STREAM_OUTPUT)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// `StreamInput` or `StreamOutput`
    pub descriptor_type: DescriptorType,
    pub descriptor_index: u16,
    pub object_name: String,
    pub localized_description: u16,
    pub clock_domain_index: u16,
    pub stream_flags: StreamFlags,
    /// Last confirmed stream format
    pub current_format: u64,
    pub formats: Vec<u64>,
    /// Primary, secondary and tertiary backup talkers as (entity, unique id)
    pub backup_talkers: [(EntityId, u16); 3],
    pub backedup_talker_entity_id: EntityId,
    pub backedup_talker_unique_id: u16,
    pub avb_interface_index: u16,
    pub buffer_length: u32,
}

impl Default for StreamDescriptor {
    fn default() -> Self {
        Self::input(0)
    }
}

impl StreamDescriptor {
    /// An empty STREAM_INPUT
    pub fn input(descriptor_index: u16) -> Self {
        Self::with_type(DescriptorType::StreamInput, descriptor_index)
    }

    /// An empty STREAM_OUTPUT
    pub fn output(descriptor_index: u16) -> Self {
        Self::with_type(DescriptorType::StreamOutput, descriptor_index)
    }

    fn with_type(descriptor_type: DescriptorType, descriptor_index: u16) -> Self {
        Self {
            descriptor_type,
            descriptor_index,
            object_name: String::new(),
            localized_description: 0xFFFF,
            clock_domain_index: 0,
            stream_flags: StreamFlags::empty(),
            current_format: 0,
            formats: Vec::new(),
            backup_talkers: [(EntityId::NULL, 0); 3],
            backedup_talker_entity_id: EntityId::NULL,
            backedup_talker_unique_id: 0,
            avb_interface_index: 0,
            buffer_length: 0,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::Invalid, 4)?;
        let descriptor_type = DescriptorType::from(read_u16(data, 0));
        if !matches!(
            descriptor_type,
            DescriptorType::StreamInput | DescriptorType::StreamOutput
        ) {
            return Err(FormatError::MalformedPdu(format!(
                "{} is not a stream descriptor",
                descriptor_type
            )));
        }
        check_fixed(data, descriptor_type, STREAM_DESCRIPTOR_LEN)?;
        let formats_offset = read_u16(data, 82) as usize;
        let formats_count = read_u16(data, 84) as usize;
        check_list(data, descriptor_type, formats_offset, formats_count, 8)?;

        let backup = |at: usize| (EntityId(read_u64(data, at)), read_u16(data, at + 8));

        Ok(Self {
            descriptor_type,
            descriptor_index: read_u16(data, 2),
            object_name: read_string(data, 4, AEM_STRING_LEN),
            localized_description: read_u16(data, 68),
            clock_domain_index: read_u16(data, 70),
            stream_flags: StreamFlags::from_bits_retain(read_u16(data, 72)),
            current_format: read_u64(data, 74),
            formats: (0..formats_count)
                .map(|i| read_u64(data, formats_offset + i * 8))
                .collect(),
            backup_talkers: [backup(86), backup(96), backup(106)],
            backedup_talker_entity_id: EntityId(read_u64(data, 116)),
            backedup_talker_unique_id: read_u16(data, 124),
            avb_interface_index: read_u16(data, 126),
            buffer_length: read_u32(data, 128),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STREAM_DESCRIPTOR_LEN + self.formats.len() * 8);
        buf.put_u16(self.descriptor_type.into());
        buf.put_u16(self.descriptor_index);
        put_string(&mut buf, &self.object_name, AEM_STRING_LEN);
        buf.put_u16(self.localized_description);
        buf.put_u16(self.clock_domain_index);
        buf.put_u16(self.stream_flags.bits());
        buf.put_u64(self.current_format);
        buf.put_u16(STREAM_DESCRIPTOR_LEN as u16);
        buf.put_u16(self.formats.len() as u16);
        for (entity_id, unique_id) in &self.backup_talkers {
            buf.put_u64(entity_id.value());
            buf.put_u16(*unique_id);
        }
        buf.put_u64(self.backedup_talker_entity_id.value());
        buf.put_u16(self.backedup_talker_unique_id);
        buf.put_u16(self.avb_interface_index);
        buf.put_u32(self.buffer_length);
        for format in &self.formats {
            buf.put_u64(*format);
        }
        buf
    }

    pub fn is_input(&self) -> bool {
        self.descriptor_type == DescriptorType::StreamInput
    }

    pub fn supports_format(&self, format: u64) -> bool {
        self.formats.contains(&format)
    }

    /// Record a stream format confirmed by the entity
    pub(crate) fn apply_stream_format(&mut self, format: u64) {
        self.current_format = format;
    }
}

impl DescriptorInfo for StreamDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}
