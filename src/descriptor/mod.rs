//! AVDECC Entity Model (AEM) Descriptors
//!
//! An entity describes itself as a tree of descriptors read with the AEM
//! READ_DESCRIPTOR command: one ENTITY descriptor, one CONFIGURATION per
//! configuration, and below each configuration every other descriptor
//! addressed by `(descriptor_type, descriptor_index)`.
//!
//! # Decoded Classes
//!
//! - [`EntityDescriptor`]
//! - [`ConfigurationDescriptor`]
//! - [`AudioUnitDescriptor`]
//! - [`StreamDescriptor`] (STREAM_INPUT and STREAM_OUTPUT)
//! - [`AvbInterfaceDescriptor`]
//! - [`ClockSourceDescriptor`]
//! - [`ClockDomainDescriptor`]
//! - [`AudioMapDescriptor`]
//!
//! Every other descriptor type is carried as a [`RawDescriptor`]: typed,
//! indexed, and otherwise opaque.
//!
//! All multi-byte fields are big-endian. Decoding checks the fixed portion and
//! any variable-length list against the buffer before reading a single field
//! and fails with [`FormatError::TruncatedDescriptor`] otherwise.
//!
//! # Example
//!
//! ```
//! use avdecc_rs::descriptor::{ClockDomainDescriptor, Descriptor, DescriptorInfo, DescriptorType};
//!
//! let domain = ClockDomainDescriptor::new(0, "Domain", 0, vec![0, 1, 2]);
//! let decoded = Descriptor::decode(&domain.encode()).unwrap();
//!
//! assert_eq!(decoded.descriptor_type(), DescriptorType::ClockDomain);
//! if let Descriptor::ClockDomain(domain) = decoded {
//!     assert_eq!(domain.clock_sources_count(), 3);
//! }
//! ```

use crate::encoding::{ensure_list, read_u16};
use crate::error::FormatError;
use crate::generate_custom_enum;

pub mod audio_map;
pub mod audio_unit;
pub mod avb_interface;
pub mod clock_domain;
pub mod clock_source;
pub mod configuration;
pub mod entity;
pub mod stream;
pub mod tree;

pub use audio_map::{AudioMapDescriptor, AudioMapping};
pub use audio_unit::AudioUnitDescriptor;
pub use avb_interface::{AvbInterfaceDescriptor, AvbInterfaceFlags};
pub use clock_domain::ClockDomainDescriptor;
pub use clock_source::{ClockSourceDescriptor, ClockSourceFlags, ClockSourceType};
pub use configuration::ConfigurationDescriptor;
pub use entity::EntityDescriptor;
pub use stream::{StreamDescriptor, StreamFlags};
pub use tree::{ConfigurationTree, DescriptorTree};

/// Result type for descriptor decoding
pub type Result<T> = std::result::Result<T, FormatError>;

generate_custom_enum!(
    /// AEM descriptor types (IEEE 1722.1-2013 Table 7.1)
    ///
    /// `Custom` holds types allocated after 1722.1-2013.
    DescriptorType {
        Entity = 0x0000,
        Configuration = 0x0001,
        AudioUnit = 0x0002,
        VideoUnit = 0x0003,
        SensorUnit = 0x0004,
        StreamInput = 0x0005,
        StreamOutput = 0x0006,
        JackInput = 0x0007,
        JackOutput = 0x0008,
        AvbInterface = 0x0009,
        ClockSource = 0x000A,
        MemoryObject = 0x000B,
        Locale = 0x000C,
        Strings = 0x000D,
        StreamPortInput = 0x000E,
        StreamPortOutput = 0x000F,
        ExternalPortInput = 0x0010,
        ExternalPortOutput = 0x0011,
        InternalPortInput = 0x0012,
        InternalPortOutput = 0x0013,
        AudioCluster = 0x0014,
        VideoCluster = 0x0015,
        SensorCluster = 0x0016,
        AudioMap = 0x0017,
        VideoMap = 0x0018,
        SensorMap = 0x0019,
        Control = 0x001A,
        SignalSelector = 0x001B,
        Mixer = 0x001C,
        Matrix = 0x001D,
        MatrixSignal = 0x001E,
        SignalSplitter = 0x001F,
        SignalCombiner = 0x0020,
        SignalDemultiplexer = 0x0021,
        SignalMultiplexer = 0x0022,
        SignalTranscoder = 0x0023,
        ClockDomain = 0x0024,
        ControlBlock = 0x0025,
        Invalid = 0xFFFF,
    },
    u16,
    0x0026..=0xFFFE
);

impl Default for DescriptorType {
    fn default() -> Self {
        DescriptorType::Entity
    }
}

/// Identity shared by every descriptor
pub trait DescriptorInfo {
    fn descriptor_type(&self) -> DescriptorType;

    fn descriptor_index(&self) -> u16;
}

/// Fail with `TruncatedDescriptor` unless `data` holds `required` bytes
pub(crate) fn check_fixed(data: &[u8], descriptor_type: DescriptorType, required: usize) -> Result<()> {
    if data.len() < required {
        return Err(FormatError::TruncatedDescriptor {
            descriptor_type,
            required,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Fail with `TruncatedDescriptor` unless a list of `count` items of
/// `item_len` bytes at `offset` fits in `data`
pub(crate) fn check_list(
    data: &[u8],
    descriptor_type: DescriptorType,
    offset: usize,
    count: usize,
    item_len: usize,
) -> Result<()> {
    ensure_list(data, offset, count, item_len).map(|_| ()).map_err(|_| {
        FormatError::TruncatedDescriptor {
            descriptor_type,
            required: offset.saturating_add(count.saturating_mul(item_len)),
            actual: data.len(),
        }
    })
}

/// A descriptor of a type this crate does not decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    descriptor_type: DescriptorType,
    descriptor_index: u16,
    data: Vec<u8>,
}

impl RawDescriptor {
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::Invalid, 4)?;
        Ok(Self {
            descriptor_type: DescriptorType::from(read_u16(data, 0)),
            descriptor_index: read_u16(data, 2),
            data: data.to_vec(),
        })
    }

    /// The complete descriptor bytes, type and index included
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl DescriptorInfo for RawDescriptor {
    fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }
}

/// Any descriptor, decoded where the type is known
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Entity(EntityDescriptor),
    Configuration(ConfigurationDescriptor),
    AudioUnit(AudioUnitDescriptor),
    StreamInput(StreamDescriptor),
    StreamOutput(StreamDescriptor),
    AvbInterface(AvbInterfaceDescriptor),
    ClockSource(ClockSourceDescriptor),
    ClockDomain(ClockDomainDescriptor),
    AudioMap(AudioMapDescriptor),
    Other(RawDescriptor),
}

impl Descriptor {
    /// Decode a descriptor from the bytes of a READ_DESCRIPTOR response,
    /// starting at the descriptor_type field
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_fixed(data, DescriptorType::Invalid, 4)?;
        let descriptor = match DescriptorType::from(read_u16(data, 0)) {
            DescriptorType::Entity => Descriptor::Entity(EntityDescriptor::decode(data)?),
            DescriptorType::Configuration => {
                Descriptor::Configuration(ConfigurationDescriptor::decode(data)?)
            }
            DescriptorType::AudioUnit => Descriptor::AudioUnit(AudioUnitDescriptor::decode(data)?),
            DescriptorType::StreamInput => Descriptor::StreamInput(StreamDescriptor::decode(data)?),
            DescriptorType::StreamOutput => {
                Descriptor::StreamOutput(StreamDescriptor::decode(data)?)
            }
            DescriptorType::AvbInterface => {
                Descriptor::AvbInterface(AvbInterfaceDescriptor::decode(data)?)
            }
            DescriptorType::ClockSource => {
                Descriptor::ClockSource(ClockSourceDescriptor::decode(data)?)
            }
            DescriptorType::ClockDomain => {
                Descriptor::ClockDomain(ClockDomainDescriptor::decode(data)?)
            }
            DescriptorType::AudioMap => Descriptor::AudioMap(AudioMapDescriptor::decode(data)?),
            _ => Descriptor::Other(RawDescriptor::decode(data)?),
        };
        Ok(descriptor)
    }

    /// Encode back to READ_DESCRIPTOR bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Descriptor::Entity(d) => d.encode(),
            Descriptor::Configuration(d) => d.encode(),
            Descriptor::AudioUnit(d) => d.encode(),
            Descriptor::StreamInput(d) | Descriptor::StreamOutput(d) => d.encode(),
            Descriptor::AvbInterface(d) => d.encode(),
            Descriptor::ClockSource(d) => d.encode(),
            Descriptor::ClockDomain(d) => d.encode(),
            Descriptor::AudioMap(d) => d.encode(),
            Descriptor::Other(d) => d.data.clone(),
        }
    }

    fn info(&self) -> &dyn DescriptorInfo {
        match self {
            Descriptor::Entity(d) => d,
            Descriptor::Configuration(d) => d,
            Descriptor::AudioUnit(d) => d,
            Descriptor::StreamInput(d) | Descriptor::StreamOutput(d) => d,
            Descriptor::AvbInterface(d) => d,
            Descriptor::ClockSource(d) => d,
            Descriptor::ClockDomain(d) => d,
            Descriptor::AudioMap(d) => d,
            Descriptor::Other(d) => d,
        }
    }
}

impl DescriptorInfo for Descriptor {
    fn descriptor_type(&self) -> DescriptorType {
        self.info().descriptor_type()
    }

    fn descriptor_index(&self) -> u16 {
        self.info().descriptor_index()
    }
}
