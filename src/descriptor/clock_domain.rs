//! CLOCK_DOMAIN descriptor (IEEE 1722.1-2013 7.2.32)
//!
//! A clock domain groups the clock sources that can drive it and records
//! which one currently does.
//!
//! # Layout
//!
//! | Offset | Field                 | Size |
//! |-------:|-----------------------|-----:|
//! |      0 | descriptor_type       |    2 |
//! |      2 | descriptor_index      |    2 |
//! |      4 | object_name           |   64 |
//! |     68 | localized_description |    2 |
//! |     70 | clock_source_index    |    2 |
//! |     72 | clock_sources_offset  |    2 |
//! |     74 | clock_sources_count   |    2 |
//! |     76 | clock_sources[]       | 2 * count |
//!
//! The clock source index is changed with SET_CLOCK_SOURCE and read back with
//! GET_CLOCK_SOURCE; both are issued through
//! [`ClockDomainHandle`](crate::controller::ClockDomainHandle). This type only
//! holds the last value confirmed by the entity.

use bytes::BufMut;

use super::{check_fixed, check_list, DescriptorInfo, DescriptorType, Result};
use crate::encoding::{put_string, read_string, read_u16, AEM_STRING_LEN};
use crate::error::{FormatError, StateError};

pub const CLOCK_DOMAIN_DESCRIPTOR_LEN: usize = 76;

/// Most clock sources that fit in one READ_DESCRIPTOR response
pub const MAX_CLOCK_SOURCES: usize = 249;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockDomainDescriptor {
    descriptor_index: u16,
    object_name: String,
    localized_description: u16,
    clock_source_index: u16,
    clock_sources: Vec<u16>,
}

impl ClockDomainDescriptor {
    pub fn new(
        descriptor_index: u16,
        object_name: impl Into<String>,
        clock_source_index: u16,
        clock_sources: Vec<u16>,
    ) -> Self {
        Self {
            descriptor_index,
            object_name: object_name.into(),
            localized_description: 0xFFFF,
            clock_source_index,
            clock_sources,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::ClockDomain, CLOCK_DOMAIN_DESCRIPTOR_LEN)?;
        let offset = read_u16(data, 72) as usize;
        let count = read_u16(data, 74) as usize;
        if count > MAX_CLOCK_SOURCES {
            return Err(FormatError::MalformedPdu(format!(
                "clock domain lists {} clock sources (at most {})",
                count, MAX_CLOCK_SOURCES
            )));
        }
        check_list(data, DescriptorType::ClockDomain, offset, count, 2)?;

        Ok(Self {
            descriptor_index: read_u16(data, 2),
            object_name: read_string(data, 4, AEM_STRING_LEN),
            localized_description: read_u16(data, 68),
            clock_source_index: read_u16(data, 70),
            clock_sources: (0..count).map(|i| read_u16(data, offset + i * 2)).collect(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CLOCK_DOMAIN_DESCRIPTOR_LEN + self.clock_sources.len() * 2);
        buf.put_u16(DescriptorType::ClockDomain.into());
        buf.put_u16(self.descriptor_index);
        put_string(&mut buf, &self.object_name, AEM_STRING_LEN);
        buf.put_u16(self.localized_description);
        buf.put_u16(self.clock_source_index);
        buf.put_u16(CLOCK_DOMAIN_DESCRIPTOR_LEN as u16);
        buf.put_u16(self.clock_sources.len() as u16);
        for source in &self.clock_sources {
            buf.put_u16(*source);
        }
        buf
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn localized_description(&self) -> u16 {
        self.localized_description
    }

    /// CLOCK_SOURCE descriptor index currently driving this domain
    pub fn clock_source_index(&self) -> u16 {
        self.clock_source_index
    }

    pub fn clock_sources_count(&self) -> u16 {
        self.clock_sources.len() as u16
    }

    pub fn clock_sources(&self) -> &[u16] {
        &self.clock_sources
    }

    /// The `index`th entry of the clock source list
    pub fn clock_source_by_index(&self, index: usize) -> std::result::Result<u16, StateError> {
        self.clock_sources
            .get(index)
            .copied()
            .ok_or(StateError::IndexOutOfRange {
                index,
                count: self.clock_sources.len(),
            })
    }

    /// Whether `clock_source_index` names one of this domain's sources
    pub fn is_valid_clock_source(&self, clock_source_index: u16) -> bool {
        self.clock_sources.contains(&clock_source_index)
    }

    /// Clock source index from the last SET_CLOCK_SOURCE or GET_CLOCK_SOURCE
    /// response. Both responses refresh the same value.
    pub fn get_clock_source_clock_source_index(&self) -> u16 {
        self.clock_source_index
    }

    /// See [`get_clock_source_clock_source_index`](Self::get_clock_source_clock_source_index)
    pub fn set_clock_source_clock_source_index(&self) -> u16 {
        self.clock_source_index
    }

    /// Record a clock source confirmed by the entity
    pub(crate) fn apply_clock_source(&mut self, clock_source_index: u16) {
        self.clock_source_index = clock_source_index;
    }
}

impl DescriptorInfo for ClockDomainDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::ClockDomain
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}
