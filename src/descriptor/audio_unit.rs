//! AUDIO_UNIT descriptor (IEEE 1722.1-2013 7.2.3)

use bytes::BufMut;

use super::{check_fixed, check_list, DescriptorInfo, DescriptorType, Result};
use crate::encoding::{put_string, read_string, read_u16, read_u32, AEM_STRING_LEN};

pub const AUDIO_UNIT_DESCRIPTOR_LEN: usize = 144;

/// Audio unit with its port layout and supported sampling rates.
///
/// Sampling rates are the raw 32-bit wire values: a 3-bit pull field over a
/// 29-bit base frequency in Hz. For unpulled rates the value is the rate in Hz.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioUnitDescriptor {
    pub descriptor_index: u16,
    pub object_name: String,
    pub localized_description: u16,
    pub clock_domain_index: u16,
    pub number_of_stream_input_ports: u16,
    pub base_stream_input_port: u16,
    pub number_of_stream_output_ports: u16,
    pub base_stream_output_port: u16,
    pub number_of_external_input_ports: u16,
    pub base_external_input_port: u16,
    pub number_of_external_output_ports: u16,
    pub base_external_output_port: u16,
    pub number_of_internal_input_ports: u16,
    pub base_internal_input_port: u16,
    pub number_of_internal_output_ports: u16,
    pub base_internal_output_port: u16,
    pub number_of_controls: u16,
    pub base_control: u16,
    /// Last confirmed sampling rate
    pub current_sampling_rate: u32,
    pub sampling_rates: Vec<u32>,
}

impl AudioUnitDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::AudioUnit, AUDIO_UNIT_DESCRIPTOR_LEN)?;
        let rates_offset = read_u16(data, 140) as usize;
        let rates_count = read_u16(data, 142) as usize;
        check_list(data, DescriptorType::AudioUnit, rates_offset, rates_count, 4)?;

        Ok(Self {
            descriptor_index: read_u16(data, 2),
            object_name: read_string(data, 4, AEM_STRING_LEN),
            localized_description: read_u16(data, 68),
            clock_domain_index: read_u16(data, 70),
            number_of_stream_input_ports: read_u16(data, 72),
            base_stream_input_port: read_u16(data, 74),
            number_of_stream_output_ports: read_u16(data, 76),
            base_stream_output_port: read_u16(data, 78),
            number_of_external_input_ports: read_u16(data, 80),
            base_external_input_port: read_u16(data, 82),
            number_of_external_output_ports: read_u16(data, 84),
            base_external_output_port: read_u16(data, 86),
            number_of_internal_input_ports: read_u16(data, 88),
            base_internal_input_port: read_u16(data, 90),
            number_of_internal_output_ports: read_u16(data, 92),
            base_internal_output_port: read_u16(data, 94),
            number_of_controls: read_u16(data, 96),
            base_control: read_u16(data, 98),
            current_sampling_rate: read_u32(data, 136),
            sampling_rates: (0..rates_count)
                .map(|i| read_u32(data, rates_offset + i * 4))
                .collect(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AUDIO_UNIT_DESCRIPTOR_LEN + self.sampling_rates.len() * 4);
        buf.put_u16(DescriptorType::AudioUnit.into());
        buf.put_u16(self.descriptor_index);
        put_string(&mut buf, &self.object_name, AEM_STRING_LEN);
        buf.put_u16(self.localized_description);
        buf.put_u16(self.clock_domain_index);
        for value in [
            self.number_of_stream_input_ports,
            self.base_stream_input_port,
            self.number_of_stream_output_ports,
            self.base_stream_output_port,
            self.number_of_external_input_ports,
            self.base_external_input_port,
            self.number_of_external_output_ports,
            self.base_external_output_port,
            self.number_of_internal_input_ports,
            self.base_internal_input_port,
            self.number_of_internal_output_ports,
            self.base_internal_output_port,
            self.number_of_controls,
            self.base_control,
        ] {
            buf.put_u16(value);
        }
        // Signal processing blocks (selectors through control blocks) are not modelled
        buf.put_bytes(0, 136 - buf.len());
        buf.put_u32(self.current_sampling_rate);
        buf.put_u16(AUDIO_UNIT_DESCRIPTOR_LEN as u16);
        buf.put_u16(self.sampling_rates.len() as u16);
        for rate in &self.sampling_rates {
            buf.put_u32(*rate);
        }
        buf
    }

    pub fn supports_sampling_rate(&self, sampling_rate: u32) -> bool {
        self.sampling_rates.contains(&sampling_rate)
    }

    /// Record a sampling rate confirmed by the entity
    pub(crate) fn apply_sampling_rate(&mut self, sampling_rate: u32) {
        self.current_sampling_rate = sampling_rate;
    }
}

impl DescriptorInfo for AudioUnitDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::AudioUnit
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}
