//! AUDIO_MAP descriptor (IEEE 1722.1-2013 7.2.19)

use bytes::BufMut;

use super::{check_fixed, check_list, DescriptorInfo, DescriptorType, Result};
use crate::encoding::read_u16;
use crate::error::StateError;

pub const AUDIO_MAP_DESCRIPTOR_LEN: usize = 8;

/// One stream channel to cluster channel mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AudioMapping {
    pub stream_index: u16,
    pub stream_channel: u16,
    pub cluster_offset: u16,
    pub cluster_channel: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioMapDescriptor {
    pub descriptor_index: u16,
    pub mappings: Vec<AudioMapping>,
}

impl AudioMapDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::AudioMap, AUDIO_MAP_DESCRIPTOR_LEN)?;
        let offset = read_u16(data, 4) as usize;
        let count = read_u16(data, 6) as usize;
        check_list(data, DescriptorType::AudioMap, offset, count, 8)?;

        let mappings = (0..count)
            .map(|i| {
                let at = offset + i * 8;
                AudioMapping {
                    stream_index: read_u16(data, at),
                    stream_channel: read_u16(data, at + 2),
                    cluster_offset: read_u16(data, at + 4),
                    cluster_channel: read_u16(data, at + 6),
                }
            })
            .collect();

        Ok(Self {
            descriptor_index: read_u16(data, 2),
            mappings,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AUDIO_MAP_DESCRIPTOR_LEN + self.mappings.len() * 8);
        buf.put_u16(DescriptorType::AudioMap.into());
        buf.put_u16(self.descriptor_index);
        buf.put_u16(AUDIO_MAP_DESCRIPTOR_LEN as u16);
        buf.put_u16(self.mappings.len() as u16);
        for mapping in &self.mappings {
            buf.put_u16(mapping.stream_index);
            buf.put_u16(mapping.stream_channel);
            buf.put_u16(mapping.cluster_offset);
            buf.put_u16(mapping.cluster_channel);
        }
        buf
    }

    pub fn number_of_mappings(&self) -> u16 {
        self.mappings.len() as u16
    }

    pub fn mapping(&self, index: usize) -> std::result::Result<AudioMapping, StateError> {
        self.mappings
            .get(index)
            .copied()
            .ok_or(StateError::IndexOutOfRange {
                index,
                count: self.mappings.len(),
            })
    }
}

impl DescriptorInfo for AudioMapDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::AudioMap
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}
