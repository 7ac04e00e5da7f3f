//! CLOCK_SOURCE descriptor (IEEE 1722.1-2013 7.2.9)

use bitflags::bitflags;
use bytes::BufMut;

use super::{check_fixed, DescriptorInfo, DescriptorType, Result};
use crate::encoding::{put_string, read_string, read_u16, read_u64, AEM_STRING_LEN};
use crate::generate_custom_enum;

pub const CLOCK_SOURCE_DESCRIPTOR_LEN: usize = 86;

generate_custom_enum!(
    /// Where a clock source takes its timing from
    ClockSourceType {
        Internal = 0x0000,
        External = 0x0001,
        InputStream = 0x0002,
        Expansion = 0xFFFF,
    },
    u16,
    0x0003..=0xFFFE
);

impl Default for ClockSourceType {
    fn default() -> Self {
        ClockSourceType::Internal
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ClockSourceFlags: u16 {
        const STREAM_ID = 1 << 0;
        const LOCAL_ID = 1 << 1;

        const _ = !0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockSourceDescriptor {
    pub descriptor_index: u16,
    pub object_name: String,
    pub localized_description: u16,
    pub clock_source_flags: ClockSourceFlags,
    pub clock_source_type: ClockSourceType,
    /// Stream id of an input stream source, zero otherwise
    pub clock_source_identifier: u64,
    /// Descriptor that supplies the clock
    pub clock_source_location_type: DescriptorType,
    pub clock_source_location_index: u16,
}

impl ClockSourceDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::ClockSource, CLOCK_SOURCE_DESCRIPTOR_LEN)?;
        Ok(Self {
            descriptor_index: read_u16(data, 2),
            object_name: read_string(data, 4, AEM_STRING_LEN),
            localized_description: read_u16(data, 68),
            clock_source_flags: ClockSourceFlags::from_bits_retain(read_u16(data, 70)),
            clock_source_type: ClockSourceType::from(read_u16(data, 72)),
            clock_source_identifier: read_u64(data, 74),
            clock_source_location_type: DescriptorType::from(read_u16(data, 82)),
            clock_source_location_index: read_u16(data, 84),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CLOCK_SOURCE_DESCRIPTOR_LEN);
        buf.put_u16(DescriptorType::ClockSource.into());
        buf.put_u16(self.descriptor_index);
        put_string(&mut buf, &self.object_name, AEM_STRING_LEN);
        buf.put_u16(self.localized_description);
        buf.put_u16(self.clock_source_flags.bits());
        buf.put_u16(self.clock_source_type.into());
        buf.put_u64(self.clock_source_identifier);
        buf.put_u16(self.clock_source_location_type.into());
        buf.put_u16(self.clock_source_location_index);
        buf
    }
}

impl DescriptorInfo for ClockSourceDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::ClockSource
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_stream_source() {
        let source = ClockSourceDescriptor {
            descriptor_index: 2,
            object_name: "Stream In 0".into(),
            clock_source_flags: ClockSourceFlags::STREAM_ID,
            clock_source_type: ClockSourceType::InputStream,
            clock_source_identifier: 0x001b_92ff_fe01_0203,
            clock_source_location_type: DescriptorType::StreamInput,
            clock_source_location_index: 0,
            ..Default::default()
        };
        let data = source.encode();
        assert_eq!(data.len(), CLOCK_SOURCE_DESCRIPTOR_LEN);
        assert_eq!(read_u16(&data, 72), 2);
        assert_eq!(read_u16(&data, 82), 0x0005);

        assert_eq!(ClockSourceDescriptor::decode(&data).unwrap(), source);
    }

    #[test]
    fn test_clock_source_type_values() {
        assert_eq!(ClockSourceType::from(1u16), ClockSourceType::External);
        assert!(matches!(ClockSourceType::from(7u16), ClockSourceType::Custom(_)));
        assert!(ClockSourceDescriptor::decode(&[0u8; 85]).is_err());
    }
}
