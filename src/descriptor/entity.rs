//! ENTITY descriptor (IEEE 1722.1-2013 7.2.1)

use bytes::BufMut;

use super::{check_fixed, DescriptorInfo, DescriptorType, Result};
use crate::adp::{ControllerCapabilities, EntityCapabilities, ListenerCapabilities, TalkerCapabilities};
use crate::encoding::{put_string, read_string, read_u16, read_u32, read_u64, AEM_STRING_LEN};
use crate::pdu::EntityId;

pub const ENTITY_DESCRIPTOR_LEN: usize = 312;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub entity_id: EntityId,
    pub entity_model_id: u64,
    pub entity_capabilities: EntityCapabilities,
    pub talker_stream_sources: u16,
    pub talker_capabilities: TalkerCapabilities,
    pub listener_stream_sinks: u16,
    pub listener_capabilities: ListenerCapabilities,
    pub controller_capabilities: ControllerCapabilities,
    pub available_index: u32,
    pub association_id: u64,
    pub entity_name: String,
    /// Localized string reference
    pub vendor_name_string: u16,
    /// Localized string reference
    pub model_name_string: u16,
    pub firmware_version: String,
    pub group_name: String,
    pub serial_number: String,
    pub configurations_count: u16,
    pub current_configuration: u16,
}

impl EntityDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::Entity, ENTITY_DESCRIPTOR_LEN)?;
        Ok(Self {
            entity_id: EntityId(read_u64(data, 4)),
            entity_model_id: read_u64(data, 12),
            entity_capabilities: EntityCapabilities::from_bits_retain(read_u32(data, 20)),
            talker_stream_sources: read_u16(data, 24),
            talker_capabilities: TalkerCapabilities::from_bits_retain(read_u16(data, 26)),
            listener_stream_sinks: read_u16(data, 28),
            listener_capabilities: ListenerCapabilities::from_bits_retain(read_u16(data, 30)),
            controller_capabilities: ControllerCapabilities::from_bits_retain(read_u32(data, 32)),
            available_index: read_u32(data, 36),
            association_id: read_u64(data, 40),
            entity_name: read_string(data, 48, AEM_STRING_LEN),
            vendor_name_string: read_u16(data, 112),
            model_name_string: read_u16(data, 114),
            firmware_version: read_string(data, 116, AEM_STRING_LEN),
            group_name: read_string(data, 180, AEM_STRING_LEN),
            serial_number: read_string(data, 244, AEM_STRING_LEN),
            configurations_count: read_u16(data, 308),
            current_configuration: read_u16(data, 310),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTITY_DESCRIPTOR_LEN);
        buf.put_u16(DescriptorType::Entity.into());
        buf.put_u16(0);
        buf.put_u64(self.entity_id.value());
        buf.put_u64(self.entity_model_id);
        buf.put_u32(self.entity_capabilities.bits());
        buf.put_u16(self.talker_stream_sources);
        buf.put_u16(self.talker_capabilities.bits());
        buf.put_u16(self.listener_stream_sinks);
        buf.put_u16(self.listener_capabilities.bits());
        buf.put_u32(self.controller_capabilities.bits());
        buf.put_u32(self.available_index);
        buf.put_u64(self.association_id);
        put_string(&mut buf, &self.entity_name, AEM_STRING_LEN);
        buf.put_u16(self.vendor_name_string);
        buf.put_u16(self.model_name_string);
        put_string(&mut buf, &self.firmware_version, AEM_STRING_LEN);
        put_string(&mut buf, &self.group_name, AEM_STRING_LEN);
        put_string(&mut buf, &self.serial_number, AEM_STRING_LEN);
        buf.put_u16(self.configurations_count);
        buf.put_u16(self.current_configuration);
        buf
    }
}

impl DescriptorInfo for EntityDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::Entity
    }

    /// There is exactly one ENTITY descriptor
    fn descriptor_index(&self) -> u16 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;

    #[test]
    fn test_entity_descriptor_fields() {
        let entity = EntityDescriptor {
            entity_id: EntityId(0x001b_92ff_fe01_0203),
            entity_model_id: 0x001b_9200_0000_0001,
            entity_capabilities: EntityCapabilities::AEM_SUPPORTED,
            entity_name: "Stage Box".into(),
            firmware_version: "1.4.2".into(),
            serial_number: "SB-0042".into(),
            configurations_count: 2,
            current_configuration: 1,
            ..Default::default()
        };
        let data = entity.encode();
        assert_eq!(data.len(), ENTITY_DESCRIPTOR_LEN);
        assert_eq!(read_u16(&data, 308), 2);
        assert_eq!(read_u16(&data, 310), 1);

        let decoded = EntityDescriptor::decode(&data).unwrap();
        assert_eq!(decoded.entity_name, "Stage Box");
        assert_eq!(decoded.current_configuration, 1);
        assert_eq!(decoded, entity);
    }

    #[test]
    fn test_truncated_entity_descriptor() {
        let data = EntityDescriptor::default().encode();
        assert_eq!(
            EntityDescriptor::decode(&data[..311]),
            Err(FormatError::TruncatedDescriptor {
                descriptor_type: DescriptorType::Entity,
                required: 312,
                actual: 311
            })
        );
    }
}
