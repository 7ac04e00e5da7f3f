//! CONFIGURATION descriptor (IEEE 1722.1-2013 7.2.2)
//!
//! Lists how many descriptors of each type the configuration contains, which
//! is what drives enumeration of the rest of the model.

use bytes::BufMut;

use super::{check_fixed, check_list, DescriptorInfo, DescriptorType, Result};
use crate::encoding::{put_string, read_string, read_u16, AEM_STRING_LEN};

/// Fixed portion, up to where the descriptor counts start
pub const CONFIGURATION_DESCRIPTOR_LEN: usize = 74;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub descriptor_index: u16,
    pub object_name: String,
    pub localized_description: u16,
    /// `(descriptor_type, count)` pairs in wire order
    pub descriptor_counts: Vec<(DescriptorType, u16)>,
}

impl ConfigurationDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::Configuration, CONFIGURATION_DESCRIPTOR_LEN)?;
        let counts_count = read_u16(data, 70) as usize;
        let counts_offset = read_u16(data, 72) as usize;
        check_list(data, DescriptorType::Configuration, counts_offset, counts_count, 4)?;

        let descriptor_counts = (0..counts_count)
            .map(|i| {
                let at = counts_offset + i * 4;
                (DescriptorType::from(read_u16(data, at)), read_u16(data, at + 2))
            })
            .collect();

        Ok(Self {
            descriptor_index: read_u16(data, 2),
            object_name: read_string(data, 4, AEM_STRING_LEN),
            localized_description: read_u16(data, 68),
            descriptor_counts,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(CONFIGURATION_DESCRIPTOR_LEN + self.descriptor_counts.len() * 4);
        buf.put_u16(DescriptorType::Configuration.into());
        buf.put_u16(self.descriptor_index);
        put_string(&mut buf, &self.object_name, AEM_STRING_LEN);
        buf.put_u16(self.localized_description);
        buf.put_u16(self.descriptor_counts.len() as u16);
        buf.put_u16(CONFIGURATION_DESCRIPTOR_LEN as u16);
        for (descriptor_type, count) in &self.descriptor_counts {
            buf.put_u16((*descriptor_type).into());
            buf.put_u16(*count);
        }
        buf
    }

    /// Number of descriptors of `descriptor_type` in this configuration
    pub fn count_of(&self, descriptor_type: DescriptorType) -> u16 {
        self.descriptor_counts
            .iter()
            .filter(|(t, _)| *t == descriptor_type)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Total number of descriptors below this configuration
    pub fn total_descriptors(&self) -> usize {
        self.descriptor_counts
            .iter()
            .map(|(_, count)| *count as usize)
            .sum()
    }
}

impl DescriptorInfo for ConfigurationDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::Configuration
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}
