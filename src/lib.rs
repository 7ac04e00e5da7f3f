#![doc = include_str!("../README.md")]

pub mod acmp;
pub mod adp;
pub mod aecp;
pub mod controller;
pub mod datalink;
pub mod descriptor;
pub mod encoding;
pub mod error;
pub mod pdu;
pub mod registry;
#[cfg(feature = "async")]
pub mod runtime;
pub mod util;

// Re-export main types without glob imports to avoid conflicts
pub use controller::{
    Accepted, Command, CommandOutcome, Controller, ControllerConfig, Event, Notification,
    NotificationId,
};
pub use datalink::{DataLink, EthernetDataLink, EthernetFrame};
pub use descriptor::{Descriptor, DescriptorInfo, DescriptorTree, DescriptorType};
pub use error::{Error, FormatError, ProtocolStatusError, Result, StateError, TimeoutError};
pub use pdu::EntityId;
pub use registry::{DiscoveryEvent, EntityRegistry};

/// Ethertype of AVTP, which carries every AVDECC PDU
pub const AVDECC_ETHERTYPE: u16 = datalink::ethernet::AVDECC_ETHERTYPE;

/// Destination of ADP and ACMP messages
pub const AVDECC_MULTICAST_MAC: [u8; 6] = datalink::ethernet::AVDECC_MULTICAST_MAC;
