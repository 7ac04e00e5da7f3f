//! Descriptor enumeration
//!
//! Reads an entity's model with READ_DESCRIPTOR: ENTITY 0 first, then its
//! current CONFIGURATION, then every descriptor that configuration counts.
//! Reads wait in a queue and at most [`MAX_READS_IN_FLIGHT`] are on the wire
//! at once. Descriptors collect in a private tree that is published only once
//! every read has resolved. Failed reads are skipped.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::aecp::AemCommand;
use crate::descriptor::{Descriptor, DescriptorInfo, DescriptorTree, DescriptorType};
use crate::pdu::EntityId;

/// Enumeration reads outstanding against one entity at a time
pub const MAX_READS_IN_FLIGHT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Entity,
    Configuration,
    Descriptors,
}

/// Indices `next..end` of one descriptor type still to be read
#[derive(Debug, Clone, Copy)]
struct ReadRange {
    configuration_index: u16,
    descriptor_type: DescriptorType,
    next: u32,
    end: u32,
}

impl ReadRange {
    fn new(configuration_index: u16, descriptor_type: DescriptorType, count: u16) -> Self {
        Self {
            configuration_index,
            descriptor_type,
            next: 0,
            end: u32::from(count),
        }
    }

    fn single(descriptor_type: DescriptorType, descriptor_index: u16) -> Self {
        let next = u32::from(descriptor_index);
        Self {
            configuration_index: 0,
            descriptor_type,
            next,
            end: next + 1,
        }
    }

    fn remaining(&self) -> usize {
        (self.end - self.next) as usize
    }
}

/// Enumeration of one entity in progress
#[derive(Debug)]
pub struct EnumerationJob {
    entity_id: EntityId,
    stage: Stage,
    configuration_index: u16,
    tree: DescriptorTree,
    queue: VecDeque<ReadRange>,
    in_flight: usize,
    failed: usize,
}

impl EnumerationJob {
    /// Start a job with the ENTITY read queued
    pub fn start(entity_id: EntityId) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(ReadRange::single(DescriptorType::Entity, 0));
        Self {
            entity_id,
            stage: Stage::Entity,
            configuration_index: 0,
            tree: DescriptorTree::new(),
            queue,
            in_flight: 0,
            failed: 0,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Reads on the wire or still queued
    pub fn outstanding(&self) -> usize {
        self.in_flight + self.queue.iter().map(ReadRange::remaining).sum::<usize>()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.in_flight == 0 && self.queue.is_empty()
    }

    /// Take queued reads until the in-flight window is full
    pub fn next_reads(&mut self) -> Vec<AemCommand> {
        let mut reads = Vec::new();
        while self.in_flight < MAX_READS_IN_FLIGHT {
            let Some(range) = self.queue.front_mut() else {
                break;
            };
            if range.next >= range.end {
                self.queue.pop_front();
                continue;
            }
            // end is at most u16::MAX + 1, so next fits in a u16 here
            reads.push(read(range.configuration_index, range.descriptor_type, range.next as u16));
            range.next += 1;
            self.in_flight += 1;
        }
        if self.queue.front().is_some_and(|range| range.next >= range.end) {
            self.queue.pop_front();
        }
        reads
    }

    /// Record a descriptor read and queue the reads it leads to
    pub fn on_descriptor(&mut self, configuration_index: u16, descriptor: Descriptor) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match (&descriptor, self.stage) {
            (Descriptor::Entity(entity), Stage::Entity) => {
                self.stage = Stage::Configuration;
                self.configuration_index = entity.current_configuration;
                self.queue.push_back(ReadRange::single(
                    DescriptorType::Configuration,
                    entity.current_configuration,
                ));
            }
            (Descriptor::Configuration(configuration), Stage::Configuration)
                if configuration.descriptor_index == self.configuration_index =>
            {
                self.stage = Stage::Descriptors;
                let config = self.configuration_index;
                self.queue.extend(
                    configuration
                        .descriptor_counts
                        .iter()
                        .filter(|(t, _)| !matches!(t, DescriptorType::Entity | DescriptorType::Configuration))
                        .map(|&(t, count)| ReadRange::new(config, t, count)),
                );
            }
            _ => {}
        }

        debug!(
            "Enumerating {}: read {} {}, {} reads outstanding",
            self.entity_id,
            descriptor.descriptor_type(),
            descriptor.descriptor_index(),
            self.outstanding()
        );
        self.tree.insert(configuration_index, descriptor);
    }

    /// Record a read that failed or timed out
    pub fn on_failure(&mut self, command: &AemCommand) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.failed += 1;
        if let Some((descriptor_type, index)) = command.target() {
            warn!(
                "Enumerating {}: could not read {} {}",
                self.entity_id, descriptor_type, index
            );
        }
    }

    /// The tree read so far
    pub fn tree(&self) -> &DescriptorTree {
        &self.tree
    }

    /// The tree read so far, for values confirmed while the job runs
    pub fn tree_mut(&mut self) -> &mut DescriptorTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> DescriptorTree {
        self.tree
    }
}

fn read(configuration_index: u16, descriptor_type: DescriptorType, descriptor_index: u16) -> AemCommand {
    AemCommand::ReadDescriptor {
        configuration_index,
        descriptor_type,
        descriptor_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ClockDomainDescriptor, ConfigurationDescriptor, EntityDescriptor, StreamDescriptor};

    fn entity(current_configuration: u16) -> Descriptor {
        Descriptor::Entity(EntityDescriptor {
            current_configuration,
            configurations_count: 2,
            ..Default::default()
        })
    }

    fn configuration(index: u16, descriptor_counts: Vec<(DescriptorType, u16)>) -> Descriptor {
        Descriptor::Configuration(ConfigurationDescriptor {
            descriptor_index: index,
            descriptor_counts,
            ..Default::default()
        })
    }

    #[test]
    fn test_reads_follow_the_model() {
        let mut job = EnumerationJob::start(EntityId(1));
        assert_eq!(job.next_reads(), vec![read(0, DescriptorType::Entity, 0)]);
        assert!(job.next_reads().is_empty());

        job.on_descriptor(0, entity(1));
        assert_eq!(job.next_reads(), vec![read(0, DescriptorType::Configuration, 1)]);

        job.on_descriptor(
            0,
            configuration(1, vec![(DescriptorType::StreamInput, 2), (DescriptorType::ClockDomain, 1)]),
        );
        let next = job.next_reads();
        assert_eq!(
            next,
            vec![
                read(1, DescriptorType::StreamInput, 0),
                read(1, DescriptorType::StreamInput, 1),
                read(1, DescriptorType::ClockDomain, 0),
            ]
        );
        assert_eq!(job.outstanding(), 3);

        job.on_descriptor(1, Descriptor::StreamInput(StreamDescriptor::input(0)));
        job.on_failure(&next[1]);
        assert!(!job.is_complete());
        job.on_descriptor(1, Descriptor::ClockDomain(ClockDomainDescriptor::new(0, "", 0, vec![0])));

        assert!(job.is_complete());
        assert_eq!(job.failed(), 1);
        let tree = job.into_tree();
        assert_eq!(tree.current_configuration_index(), 1);
        assert!(tree.stream_input(0).is_some());
        assert!(tree.stream_input(1).is_none());
        assert!(tree.clock_domain(0).is_some());
    }

    #[test]
    fn test_huge_counts_stay_within_window() {
        let mut job = EnumerationJob::start(EntityId(1));
        job.next_reads();
        job.on_descriptor(0, entity(0));
        job.next_reads();
        job.on_descriptor(
            0,
            configuration(0, vec![(DescriptorType::AudioUnit, u16::MAX), (DescriptorType::StreamInput, u16::MAX)]),
        );
        assert_eq!(job.outstanding(), 2 * u16::MAX as usize);

        let first = job.next_reads();
        assert_eq!(first.len(), MAX_READS_IN_FLIGHT);
        assert!(job.next_reads().is_empty());

        job.on_failure(&first[0]);
        job.on_failure(&first[1]);
        let refill = job.next_reads();
        assert_eq!(refill, vec![
            read(0, DescriptorType::AudioUnit, MAX_READS_IN_FLIGHT as u16),
            read(0, DescriptorType::AudioUnit, MAX_READS_IN_FLIGHT as u16 + 1),
        ]);
        assert_eq!(job.in_flight(), MAX_READS_IN_FLIGHT);
        assert_eq!(job.outstanding(), 2 * u16::MAX as usize - 2);
    }

    #[test]
    fn test_window_crosses_descriptor_types() {
        let mut job = EnumerationJob::start(EntityId(1));
        job.next_reads();
        job.on_descriptor(0, entity(0));
        job.next_reads();
        job.on_descriptor(
            0,
            configuration(0, vec![(DescriptorType::AudioUnit, 1), (DescriptorType::ClockSource, 0), (DescriptorType::StreamOutput, 2)]),
        );
        assert_eq!(
            job.next_reads(),
            vec![
                read(0, DescriptorType::AudioUnit, 0),
                read(0, DescriptorType::StreamOutput, 0),
                read(0, DescriptorType::StreamOutput, 1),
            ]
        );
        assert_eq!(job.outstanding(), 3);
    }

    #[test]
    fn test_failed_entity_read_ends_job() {
        let mut job = EnumerationJob::start(EntityId(1));
        let first = job.next_reads();
        job.on_failure(&first[0]);
        assert!(job.is_complete());
        assert!(job.tree().is_empty());
    }
}
