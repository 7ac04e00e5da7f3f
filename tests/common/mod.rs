//! A simulated AVDECC entity and helpers shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Instant;

use avdecc_rs::acmp::{AcmpMessageType, AcmpStatus, Acmpdu};
use avdecc_rs::adp::{
    build_advertisement, parse_adpdu, AdpMessageType, EntityCapabilities, EntityInfo, LocalEntity,
};
use avdecc_rs::aecp::{AemCommand, AemCommandType, AemPdu, AemResponse, AemStatus};
use avdecc_rs::controller::{Controller, ControllerConfig, Event};
use avdecc_rs::datalink::{EthernetDataLink, EthernetFrame, MacAddress};
use avdecc_rs::descriptor::{
    AudioUnitDescriptor, ClockDomainDescriptor, ClockSourceDescriptor, ConfigurationDescriptor,
    Descriptor, DescriptorType, EntityDescriptor, StreamDescriptor,
};
use avdecc_rs::pdu::{peek_subtype, EntityId, Subtype};
use avdecc_rs::AVDECC_MULTICAST_MAC;
use tokio::sync::mpsc::UnboundedReceiver;

pub const CONTROLLER_ID: EntityId = EntityId(0x0200_00ff_fe00_0001);
pub const CONTROLLER_MAC: MacAddress = [0x02, 0, 0, 0, 0, 0x01];

pub const E1: EntityId = EntityId(0x001b_92ff_fe00_00e1);
pub const E1_MAC: MacAddress = [0x02, 0, 0, 0, 0, 0xE1];

pub const E2: EntityId = EntityId(0x001b_92ff_fe00_00e2);
pub const E2_MAC: MacAddress = [0x02, 0, 0, 0, 0, 0xE2];

pub const FORMAT_48K_8CH: u64 = 0x0205_0220_0000_0800;
pub const FORMAT_48K_2CH: u64 = 0x0205_0220_0000_0200;

/// How a simulated entity treats AEM commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AemBehaviour {
    Respond,
    /// Swallow every command
    Silent,
    /// Answer SET commands with IN_PROGRESS first
    InProgress,
}

/// An AVDECC entity with a small fixed model: one configuration with an
/// audio unit, two stream inputs, one stream output, three clock sources and
/// a clock domain whose current source is 1.
pub struct SimulatedEntity {
    pub local: LocalEntity,
    pub mac: MacAddress,
    pub descriptors: HashMap<(DescriptorType, u16), Descriptor>,
    pub behaviour: AemBehaviour,
    /// Sequence ids of every AEM command seen, retries included
    pub aem_commands: Vec<u16>,
    pub acmp_commands: Vec<Acmpdu>,
}

impl SimulatedEntity {
    pub fn new(entity_id: EntityId, mac: MacAddress, available_index: u32) -> Self {
        let mut info = EntityInfo::new(entity_id, 0x001b_9200_0000_0001);
        info.entity_capabilities = EntityCapabilities::AEM_SUPPORTED;
        info.talker_stream_sources = 1;
        info.listener_stream_sinks = 2;
        info.valid_time = 5;

        let mut entity = Self {
            local: LocalEntity::new(info).with_available_index(available_index),
            mac,
            descriptors: HashMap::new(),
            behaviour: AemBehaviour::Respond,
            aem_commands: Vec::new(),
            acmp_commands: Vec::new(),
        };
        entity.build_model();
        entity
    }

    /// Replace the descriptor counts of CONFIGURATION 0
    pub fn set_descriptor_counts(&mut self, counts: Vec<(DescriptorType, u16)>) {
        if let Some(Descriptor::Configuration(configuration)) =
            self.descriptors.get_mut(&(DescriptorType::Configuration, 0))
        {
            configuration.descriptor_counts = counts;
        }
    }

    fn build_model(&mut self) {
        self.add(Descriptor::Entity(EntityDescriptor {
            entity_id: self.local.entity_id(),
            entity_model_id: self.local.info.entity_model_id,
            entity_capabilities: self.local.info.entity_capabilities,
            talker_stream_sources: 1,
            listener_stream_sinks: 2,
            entity_name: "Simulated entity".to_string(),
            firmware_version: "1.0.0".to_string(),
            configurations_count: 1,
            current_configuration: 0,
            ..Default::default()
        }));
        self.add(Descriptor::Configuration(ConfigurationDescriptor {
            descriptor_index: 0,
            object_name: "Default".to_string(),
            localized_description: 0xFFFF,
            descriptor_counts: vec![
                (DescriptorType::AudioUnit, 1),
                (DescriptorType::StreamInput, 2),
                (DescriptorType::StreamOutput, 1),
                (DescriptorType::ClockSource, 3),
                (DescriptorType::ClockDomain, 1),
            ],
        }));
        self.add(Descriptor::AudioUnit(AudioUnitDescriptor {
            descriptor_index: 0,
            object_name: "Audio unit".to_string(),
            number_of_stream_input_ports: 2,
            number_of_stream_output_ports: 1,
            current_sampling_rate: 48_000,
            sampling_rates: vec![44_100, 48_000, 96_000],
            ..Default::default()
        }));
        for index in 0..2 {
            let mut input = StreamDescriptor::input(index);
            input.object_name = format!("Input {}", index + 1);
            input.current_format = FORMAT_48K_8CH;
            input.formats = vec![FORMAT_48K_8CH, FORMAT_48K_2CH];
            self.add(Descriptor::StreamInput(input));
        }
        let mut output = StreamDescriptor::output(0);
        output.object_name = "Output 1".to_string();
        output.current_format = FORMAT_48K_8CH;
        output.formats = vec![FORMAT_48K_8CH, FORMAT_48K_2CH];
        self.add(Descriptor::StreamOutput(output));
        for index in 0..3 {
            self.add(Descriptor::ClockSource(ClockSourceDescriptor {
                descriptor_index: index,
                object_name: format!("Source {}", index),
                clock_source_location_type: DescriptorType::ClockSource,
                clock_source_location_index: index,
                ..Default::default()
            }));
        }
        self.add(Descriptor::ClockDomain(ClockDomainDescriptor::new(
            0,
            "Domain",
            1,
            vec![0, 1, 2],
        )));
    }

    fn add(&mut self, descriptor: Descriptor) {
        use avdecc_rs::descriptor::DescriptorInfo;
        self.descriptors
            .insert((descriptor.descriptor_type(), descriptor.descriptor_index()), descriptor);
    }

    pub fn entity_id(&self) -> EntityId {
        self.local.entity_id()
    }

    pub fn advertisement(&mut self) -> Vec<u8> {
        build_advertisement(&mut self.local, AdpMessageType::EntityAvailable, self.mac).encode()
    }

    pub fn departing(&mut self) -> Vec<u8> {
        build_advertisement(&mut self.local, AdpMessageType::EntityDeparting, self.mac).encode()
    }

    /// Current clock source of clock domain 0
    pub fn clock_source(&self) -> u16 {
        match self.descriptors.get(&(DescriptorType::ClockDomain, 0)) {
            Some(Descriptor::ClockDomain(domain)) => domain.clock_source_index(),
            _ => panic!("model has no clock domain"),
        }
    }

    /// Answer one frame sent by the controller
    pub fn respond(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let Ok(frame) = EthernetFrame::decode(data) else {
            return Vec::new();
        };
        if frame.dest_mac != self.mac && frame.dest_mac != AVDECC_MULTICAST_MAC {
            return Vec::new();
        }
        match peek_subtype(&frame.payload) {
            Ok(Subtype::Adp) => self.respond_adp(&frame),
            Ok(Subtype::Aecp) => self.respond_aecp(&frame),
            Ok(Subtype::Acmp) => self.respond_acmp(&frame),
            Err(_) => Vec::new(),
        }
    }

    fn respond_adp(&mut self, frame: &EthernetFrame) -> Vec<Vec<u8>> {
        match parse_adpdu(frame) {
            Ok(adpdu)
                if adpdu.message_type() == AdpMessageType::EntityDiscover
                    && (adpdu.entity_id().is_null() || adpdu.entity_id() == self.entity_id()) =>
            {
                vec![self.advertisement()]
            }
            _ => Vec::new(),
        }
    }

    fn respond_aecp(&mut self, frame: &EthernetFrame) -> Vec<Vec<u8>> {
        let Ok(pdu) = AemPdu::decode(&frame.payload) else {
            return Vec::new();
        };
        if pdu.is_response() || pdu.target_entity_id != self.entity_id() {
            return Vec::new();
        }
        self.aem_commands.push(pdu.sequence_id);

        let mut responses: Vec<AemPdu> = Vec::new();
        match self.behaviour {
            AemBehaviour::Silent => return Vec::new(),
            AemBehaviour::InProgress
                if matches!(
                    pdu.command_type,
                    AemCommandType::SetClockSource
                        | AemCommandType::SetSamplingRate
                        | AemCommandType::SetStreamFormat
                ) =>
            {
                responses.push(pdu.response(AemStatus::InProgress, Vec::new()));
            }
            _ => {}
        }
        responses.push(self.answer(&pdu));
        responses
            .into_iter()
            .map(|response| response.to_frame(frame.src_mac, self.mac).encode())
            .collect()
    }

    fn answer(&mut self, pdu: &AemPdu) -> AemPdu {
        let echo = pdu.payload.to_vec();
        let Ok(command) = AemCommand::decode(pdu.command_type, &pdu.payload) else {
            return pdu.response(AemStatus::NotImplemented, echo);
        };
        let result = match command {
            AemCommand::ControllerAvailable => Ok(AemResponse::ControllerAvailable),
            AemCommand::ReadDescriptor {
                configuration_index,
                descriptor_type,
                descriptor_index,
            } => self
                .descriptors
                .get(&(descriptor_type, descriptor_index))
                .cloned()
                .map(|descriptor| AemResponse::ReadDescriptor {
                    configuration_index,
                    descriptor,
                })
                .ok_or(AemStatus::NoSuchDescriptor),
            AemCommand::SetClockSource {
                clock_domain_index,
                clock_source_index,
            } => match self.descriptors.get_mut(&(DescriptorType::ClockDomain, clock_domain_index)) {
                Some(Descriptor::ClockDomain(domain)) if domain.is_valid_clock_source(clock_source_index) => {
                    let updated = ClockDomainDescriptor::new(
                        clock_domain_index,
                        domain.object_name().to_string(),
                        clock_source_index,
                        domain.clock_sources().to_vec(),
                    );
                    *domain = updated;
                    Ok(AemResponse::ClockSource {
                        clock_domain_index,
                        clock_source_index,
                    })
                }
                Some(_) => Err(AemStatus::BadArguments),
                None => Err(AemStatus::NoSuchDescriptor),
            },
            AemCommand::GetClockSource { clock_domain_index } => {
                match self.descriptors.get(&(DescriptorType::ClockDomain, clock_domain_index)) {
                    Some(Descriptor::ClockDomain(domain)) => Ok(AemResponse::ClockSource {
                        clock_domain_index,
                        clock_source_index: domain.clock_source_index(),
                    }),
                    _ => Err(AemStatus::NoSuchDescriptor),
                }
            }
            AemCommand::SetSamplingRate {
                audio_unit_index,
                sampling_rate,
            } => match self.descriptors.get_mut(&(DescriptorType::AudioUnit, audio_unit_index)) {
                Some(Descriptor::AudioUnit(unit)) if unit.sampling_rates.contains(&sampling_rate) => {
                    unit.current_sampling_rate = sampling_rate;
                    Ok(sampling_rate_response(audio_unit_index, sampling_rate))
                }
                Some(_) => Err(AemStatus::BadArguments),
                None => Err(AemStatus::NoSuchDescriptor),
            },
            AemCommand::GetSamplingRate { audio_unit_index } => {
                match self.descriptors.get(&(DescriptorType::AudioUnit, audio_unit_index)) {
                    Some(Descriptor::AudioUnit(unit)) => {
                        Ok(sampling_rate_response(audio_unit_index, unit.current_sampling_rate))
                    }
                    _ => Err(AemStatus::NoSuchDescriptor),
                }
            }
            AemCommand::SetStreamFormat {
                descriptor_type,
                descriptor_index,
                stream_format,
            } => match self.descriptors.get_mut(&(descriptor_type, descriptor_index)) {
                Some(Descriptor::StreamInput(stream) | Descriptor::StreamOutput(stream))
                    if stream.supports_format(stream_format) =>
                {
                    stream.current_format = stream_format;
                    Ok(AemResponse::StreamFormat {
                        descriptor_type,
                        descriptor_index,
                        stream_format,
                    })
                }
                Some(_) => Err(AemStatus::BadArguments),
                None => Err(AemStatus::NoSuchDescriptor),
            },
            AemCommand::GetStreamFormat {
                descriptor_type,
                descriptor_index,
            } => match self.descriptors.get(&(descriptor_type, descriptor_index)) {
                Some(Descriptor::StreamInput(stream) | Descriptor::StreamOutput(stream)) => {
                    Ok(AemResponse::StreamFormat {
                        descriptor_type,
                        descriptor_index,
                        stream_format: stream.current_format,
                    })
                }
                _ => Err(AemStatus::NoSuchDescriptor),
            },
        };
        match result {
            Ok(response) => pdu.response(AemStatus::Success, response.encode_payload()),
            Err(status) => pdu.response(status, echo),
        }
    }

    fn respond_acmp(&mut self, frame: &EthernetFrame) -> Vec<Vec<u8>> {
        let Ok(pdu) = Acmpdu::decode(&frame.payload) else {
            return Vec::new();
        };
        if pdu.message_type.is_response() || pdu.responder() != self.entity_id() {
            return Vec::new();
        }
        self.acmp_commands.push(pdu.clone());

        let mut response = match pdu.message_type {
            AcmpMessageType::ConnectRxCommand | AcmpMessageType::GetRxStateCommand
                if pdu.listener_unique_id >= 2 =>
            {
                pdu.response(AcmpStatus::ListenerUnknownId)
            }
            _ => pdu.response(AcmpStatus::Success),
        };
        if pdu.message_type == AcmpMessageType::ConnectRxCommand {
            response.connection_count = 1;
            response.stream_id = pdu.talker_entity_id.value();
        }
        vec![response.to_frame(self.mac).encode()]
    }
}

fn sampling_rate_response(audio_unit_index: u16, sampling_rate: u32) -> AemResponse {
    AemResponse::SamplingRate {
        descriptor_type: DescriptorType::AudioUnit,
        descriptor_index: audio_unit_index,
        sampling_rate,
    }
}

/// A controller on an in-memory link
pub fn controller(auto_enumerate: bool) -> (Controller, UnboundedReceiver<Event>, EthernetDataLink) {
    let link = EthernetDataLink::new(CONTROLLER_MAC);
    let config = ControllerConfig {
        auto_enumerate,
        ..ControllerConfig::new(CONTROLLER_ID, CONTROLLER_MAC)
    };
    let (controller, events) = Controller::new(config, link.clone());
    (controller, events, link)
}

/// Pass frames between the controller and the entities until both sides go
/// quiet. Returns the number of frames the controller sent.
pub fn exchange(
    controller: &Controller,
    link: &EthernetDataLink,
    entities: &mut [&mut SimulatedEntity],
    now: Instant,
) -> usize {
    let mut sent = 0;
    loop {
        let outgoing = link.take_transmitted();
        if outgoing.is_empty() {
            return sent;
        }
        sent += outgoing.len();
        for frame in outgoing {
            for entity in entities.iter_mut() {
                for response in entity.respond(&frame) {
                    controller.handle_frame_at(&response, now);
                }
            }
        }
    }
}

/// One round of [`exchange`]: hand what the controller has sent so far to
/// `entity` and feed its answers back. Returns the frames handed over.
pub fn respond_once(
    controller: &Controller,
    link: &EthernetDataLink,
    entity: &mut SimulatedEntity,
    now: Instant,
) -> usize {
    let outgoing = link.take_transmitted();
    for frame in &outgoing {
        for response in entity.respond(frame) {
            controller.handle_frame_at(&response, now);
        }
    }
    outgoing.len()
}

/// Every event queued so far
pub fn drain(events: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
