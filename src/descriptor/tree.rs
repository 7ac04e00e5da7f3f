//! Per-entity descriptor tree
//!
//! The registry publishes trees behind an `Arc`; readers hold a snapshot that
//! never changes under them. Updates go through `Arc::make_mut`, which clones
//! the tree only while some reader still holds the old one.

use std::collections::BTreeMap;

use super::{
    AudioMapDescriptor, AudioUnitDescriptor, AvbInterfaceDescriptor, ClockDomainDescriptor,
    ClockSourceDescriptor, ConfigurationDescriptor, Descriptor, DescriptorInfo, DescriptorType,
    EntityDescriptor, StreamDescriptor,
};

/// Descriptors below one CONFIGURATION
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationTree {
    descriptor: Option<ConfigurationDescriptor>,
    descriptors: BTreeMap<(DescriptorType, u16), Descriptor>,
}

impl ConfigurationTree {
    pub fn descriptor(&self) -> Option<&ConfigurationDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn get(&self, descriptor_type: DescriptorType, index: u16) -> Option<&Descriptor> {
        self.descriptors.get(&(descriptor_type, index))
    }

    pub(crate) fn get_mut(&mut self, descriptor_type: DescriptorType, index: u16) -> Option<&mut Descriptor> {
        self.descriptors.get_mut(&(descriptor_type, index))
    }

    /// Number of descriptors of one type present
    pub fn count(&self, descriptor_type: DescriptorType) -> usize {
        self.descriptors
            .keys()
            .filter(|(t, _)| *t == descriptor_type)
            .count()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len() + usize::from(self.descriptor.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All known descriptors of one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorTree {
    entity: Option<EntityDescriptor>,
    configurations: BTreeMap<u16, ConfigurationTree>,
}

impl DescriptorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entity.is_none() && self.configurations.is_empty()
    }

    /// Total descriptors held, across all configurations
    pub fn len(&self) -> usize {
        usize::from(self.entity.is_some())
            + self
                .configurations
                .values()
                .map(ConfigurationTree::len)
                .sum::<usize>()
    }

    pub fn entity(&self) -> Option<&EntityDescriptor> {
        self.entity.as_ref()
    }

    /// Current configuration index per the ENTITY descriptor, 0 before it is known
    pub fn current_configuration_index(&self) -> u16 {
        self.entity
            .as_ref()
            .map(|e| e.current_configuration)
            .unwrap_or(0)
    }

    pub fn configuration(&self, index: u16) -> Option<&ConfigurationTree> {
        self.configurations.get(&index)
    }

    pub fn current_configuration(&self) -> Option<&ConfigurationTree> {
        self.configuration(self.current_configuration_index())
    }

    /// Insert or replace a descriptor read from `configuration_index`.
    ///
    /// ENTITY lives above all configurations and ignores the index; a
    /// CONFIGURATION is filed under its own descriptor index.
    pub fn insert(&mut self, configuration_index: u16, descriptor: Descriptor) {
        match descriptor {
            Descriptor::Entity(entity) => self.entity = Some(entity),
            Descriptor::Configuration(configuration) => {
                let index = configuration.descriptor_index;
                self.configurations.entry(index).or_default().descriptor = Some(configuration);
            }
            other => {
                let key = (other.descriptor_type(), other.descriptor_index());
                self.configurations
                    .entry(configuration_index)
                    .or_default()
                    .descriptors
                    .insert(key, other);
            }
        }
    }

    /// Look up a descriptor in the current configuration
    pub fn get(&self, descriptor_type: DescriptorType, index: u16) -> Option<&Descriptor> {
        self.current_configuration()?.get(descriptor_type, index)
    }

    pub(crate) fn get_mut(&mut self, descriptor_type: DescriptorType, index: u16) -> Option<&mut Descriptor> {
        let current = self.current_configuration_index();
        self.configurations
            .get_mut(&current)?
            .get_mut(descriptor_type, index)
    }

    /// Descriptors of the current configuration, ENTITY and CONFIGURATION excluded
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.current_configuration()
            .into_iter()
            .flat_map(ConfigurationTree::descriptors)
    }

    pub fn count(&self, descriptor_type: DescriptorType) -> usize {
        self.current_configuration()
            .map(|c| c.count(descriptor_type))
            .unwrap_or(0)
    }

    pub fn clock_domain(&self, index: u16) -> Option<&ClockDomainDescriptor> {
        match self.get(DescriptorType::ClockDomain, index) {
            Some(Descriptor::ClockDomain(d)) => Some(d),
            _ => None,
        }
    }

    pub fn clock_source(&self, index: u16) -> Option<&ClockSourceDescriptor> {
        match self.get(DescriptorType::ClockSource, index) {
            Some(Descriptor::ClockSource(d)) => Some(d),
            _ => None,
        }
    }

    pub fn audio_unit(&self, index: u16) -> Option<&AudioUnitDescriptor> {
        match self.get(DescriptorType::AudioUnit, index) {
            Some(Descriptor::AudioUnit(d)) => Some(d),
            _ => None,
        }
    }

    pub fn stream_input(&self, index: u16) -> Option<&StreamDescriptor> {
        match self.get(DescriptorType::StreamInput, index) {
            Some(Descriptor::StreamInput(d)) => Some(d),
            _ => None,
        }
    }

    pub fn stream_output(&self, index: u16) -> Option<&StreamDescriptor> {
        match self.get(DescriptorType::StreamOutput, index) {
            Some(Descriptor::StreamOutput(d)) => Some(d),
            _ => None,
        }
    }

    /// STREAM_INPUT or STREAM_OUTPUT by type
    pub fn stream(&self, descriptor_type: DescriptorType, index: u16) -> Option<&StreamDescriptor> {
        match self.get(descriptor_type, index) {
            Some(Descriptor::StreamInput(d)) | Some(Descriptor::StreamOutput(d)) => Some(d),
            _ => None,
        }
    }

    pub fn avb_interface(&self, index: u16) -> Option<&AvbInterfaceDescriptor> {
        match self.get(DescriptorType::AvbInterface, index) {
            Some(Descriptor::AvbInterface(d)) => Some(d),
            _ => None,
        }
    }

    pub fn audio_map(&self, index: u16) -> Option<&AudioMapDescriptor> {
        match self.get(DescriptorType::AudioMap, index) {
            Some(Descriptor::AudioMap(d)) => Some(d),
            _ => None,
        }
    }

    /// Apply a confirmed clock source. Returns false if the domain is unknown.
    pub(crate) fn apply_clock_source(&mut self, clock_domain_index: u16, clock_source_index: u16) -> bool {
        match self.get_mut(DescriptorType::ClockDomain, clock_domain_index) {
            Some(Descriptor::ClockDomain(d)) => {
                d.apply_clock_source(clock_source_index);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn apply_sampling_rate(&mut self, audio_unit_index: u16, sampling_rate: u32) -> bool {
        match self.get_mut(DescriptorType::AudioUnit, audio_unit_index) {
            Some(Descriptor::AudioUnit(d)) => {
                d.apply_sampling_rate(sampling_rate);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn apply_stream_format(
        &mut self,
        descriptor_type: DescriptorType,
        index: u16,
        stream_format: u64,
    ) -> bool {
        match self.get_mut(descriptor_type, index) {
            Some(Descriptor::StreamInput(d)) | Some(Descriptor::StreamOutput(d)) => {
                d.apply_stream_format(stream_format);
                true
            }
            _ => false,
        }
    }
}
