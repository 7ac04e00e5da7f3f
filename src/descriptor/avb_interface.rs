//! AVB_INTERFACE descriptor (IEEE 1722.1-2013 7.2.8)

use bitflags::bitflags;
use bytes::BufMut;

use super::{check_fixed, DescriptorInfo, DescriptorType, Result};
use crate::datalink::MacAddress;
use crate::encoding::{put_string, read_mac, read_string, read_u16, read_u64, read_u8, AEM_STRING_LEN};

pub const AVB_INTERFACE_DESCRIPTOR_LEN: usize = 98;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct AvbInterfaceFlags: u16 {
        const GPTP_GRANDMASTER_SUPPORTED = 1 << 0;
        const GPTP_SUPPORTED = 1 << 1;
        const SRP_SUPPORTED = 1 << 2;

        const _ = !0;
    }
}

/// A network port and its gPTP parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvbInterfaceDescriptor {
    pub descriptor_index: u16,
    pub object_name: String,
    pub localized_description: u16,
    pub mac_address: MacAddress,
    pub interface_flags: AvbInterfaceFlags,
    pub clock_identity: u64,
    pub priority1: u8,
    pub clock_class: u8,
    pub offset_scaled_log_variance: u16,
    pub clock_accuracy: u8,
    pub priority2: u8,
    pub domain_number: u8,
    pub log_sync_interval: i8,
    pub log_announce_interval: i8,
    pub log_pdelay_interval: i8,
    pub port_number: u16,
}

impl AvbInterfaceDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::AvbInterface, AVB_INTERFACE_DESCRIPTOR_LEN)?;
        Ok(Self {
            descriptor_index: read_u16(data, 2),
            object_name: read_string(data, 4, AEM_STRING_LEN),
            localized_description: read_u16(data, 68),
            mac_address: read_mac(data, 70),
            interface_flags: AvbInterfaceFlags::from_bits_retain(read_u16(data, 76)),
            clock_identity: read_u64(data, 78),
            priority1: read_u8(data, 86),
            clock_class: read_u8(data, 87),
            offset_scaled_log_variance: read_u16(data, 88),
            clock_accuracy: read_u8(data, 90),
            priority2: read_u8(data, 91),
            domain_number: read_u8(data, 92),
            log_sync_interval: read_u8(data, 93) as i8,
            log_announce_interval: read_u8(data, 94) as i8,
            log_pdelay_interval: read_u8(data, 95) as i8,
            port_number: read_u16(data, 96),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AVB_INTERFACE_DESCRIPTOR_LEN);
        buf.put_u16(DescriptorType::AvbInterface.into());
        buf.put_u16(self.descriptor_index);
        put_string(&mut buf, &self.object_name, AEM_STRING_LEN);
        buf.put_u16(self.localized_description);
        buf.put_slice(&self.mac_address);
        buf.put_u16(self.interface_flags.bits());
        buf.put_u64(self.clock_identity);
        buf.put_u8(self.priority1);
        buf.put_u8(self.clock_class);
        buf.put_u16(self.offset_scaled_log_variance);
        buf.put_u8(self.clock_accuracy);
        buf.put_u8(self.priority2);
        buf.put_u8(self.domain_number);
        buf.put_i8(self.log_sync_interval);
        buf.put_i8(self.log_announce_interval);
        buf.put_i8(self.log_pdelay_interval);
        buf.put_u16(self.port_number);
        buf
    }
}

impl DescriptorInfo for AvbInterfaceDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::AvbInterface
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}
