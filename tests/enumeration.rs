mod common;

use std::time::{Duration, Instant};

use avdecc_rs::aecp::{AemCommand, AemPdu};
use avdecc_rs::controller::enumeration::MAX_READS_IN_FLIGHT;
use avdecc_rs::controller::{Event, NotificationId};
use avdecc_rs::datalink::EthernetFrame;
use avdecc_rs::descriptor::DescriptorType;
use avdecc_rs::{DiscoveryEvent, StateError};

use common::*;

fn read(descriptor_type: DescriptorType, descriptor_index: u16) -> AemCommand {
    AemCommand::ReadDescriptor {
        configuration_index: 0,
        descriptor_type,
        descriptor_index,
    }
}

fn is_read_of(data: &[u8], descriptor_type: DescriptorType) -> bool {
    let Ok(frame) = EthernetFrame::decode(data) else {
        return false;
    };
    let Ok(pdu) = AemPdu::decode(&frame.payload) else {
        return false;
    };
    matches!(
        AemCommand::decode(pdu.command_type, &pdu.payload),
        Ok(AemCommand::ReadDescriptor { descriptor_type: t, .. }) if t == descriptor_type
    )
}

#[test]
fn test_discovered_entity_is_enumerated() {
    init_logging();
    let (controller, mut events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    let now = Instant::now();

    controller.handle_frame_at(&e1.advertisement(), now);
    assert!(controller.is_enumerating(E1));
    let reads = exchange(&controller, &link, &mut [&mut e1], now);

    assert_eq!(reads, 10);
    assert_eq!(
        drain(&mut events),
        vec![
            Event::Discovery(DiscoveryEvent::Discovered(E1)),
            Event::EnumerationComplete {
                entity_id: E1,
                descriptors: 10,
                failed_reads: 0,
            },
        ]
    );

    let tree = controller.descriptor_tree(E1).unwrap();
    assert_eq!(tree.entity().unwrap().entity_name, "Simulated entity");
    assert_eq!(tree.count(DescriptorType::StreamInput), 2);
    assert_eq!(tree.count(DescriptorType::ClockSource), 3);
    assert_eq!(tree.clock_domain(0).unwrap().clock_sources(), &[0, 1, 2]);
    assert_eq!(tree.audio_unit(0).unwrap().current_sampling_rate, 48_000);
    assert_eq!(tree.stream_output(0).unwrap().current_format, FORMAT_48K_8CH);
    assert_eq!(controller.pending_count(), 0);
}

#[test]
fn test_missing_descriptor_is_skipped() {
    let (controller, mut events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    e1.descriptors.remove(&(DescriptorType::StreamInput, 1));
    let now = Instant::now();

    controller.handle_frame_at(&e1.advertisement(), now);
    exchange(&controller, &link, &mut [&mut e1], now);

    assert!(drain(&mut events).contains(&Event::EnumerationComplete {
        entity_id: E1,
        descriptors: 9,
        failed_reads: 1,
    }));
    let tree = controller.descriptor_tree(E1).unwrap();
    assert!(tree.stream_input(0).is_some());
    assert!(tree.stream_input(1).is_none());
}

#[test]
fn test_silent_entity_enumeration_gives_up() {
    let (controller, mut events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    e1.behaviour = AemBehaviour::Silent;
    let now = Instant::now();

    controller.handle_frame_at(&e1.advertisement(), now);
    exchange(&controller, &link, &mut [&mut e1], now);
    controller.tick_at(now + Duration::from_millis(250));
    exchange(&controller, &link, &mut [&mut e1], now);
    controller.tick_at(now + Duration::from_millis(500));

    assert_eq!(
        drain(&mut events),
        vec![
            Event::Discovery(DiscoveryEvent::Discovered(E1)),
            Event::EnumerationComplete {
                entity_id: E1,
                descriptors: 0,
                failed_reads: 1,
            },
        ]
    );
    assert!(!controller.is_enumerating(E1));
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(e1.aem_commands.len(), 2);
}

#[test]
fn test_departure_abandons_enumeration() {
    let (controller, mut events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    let now = Instant::now();

    controller.handle_frame_at(&e1.advertisement(), now);
    assert_eq!(controller.pending_count(), 1);
    link.take_transmitted();

    controller.handle_frame_at(&e1.departing(), now);
    assert!(!controller.is_enumerating(E1));
    assert_eq!(controller.pending_count(), 0);

    controller.tick_at(now + Duration::from_secs(1));
    assert_eq!(
        drain(&mut events),
        vec![
            Event::Discovery(DiscoveryEvent::Discovered(E1)),
            Event::Discovery(DiscoveryEvent::Departed(E1)),
        ]
    );
    assert_eq!(link.transmitted_count(), 0);
}

#[test]
fn test_manual_enumeration() {
    let (controller, mut events, link) = controller(false);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    let now = Instant::now();

    assert!(matches!(controller.enumerate(E1), Err(StateError::UnknownEntity(_))));

    controller.handle_frame_at(&e1.advertisement(), now);
    assert_eq!(link.transmitted_count(), 0);
    assert!(controller.descriptor_tree(E1).unwrap().is_empty());

    controller.enumerate(E1).unwrap();
    exchange(&controller, &link, &mut [&mut e1], now);

    assert!(matches!(
        drain(&mut events).last(),
        Some(Event::EnumerationComplete { descriptors: 10, .. })
    ));
    assert_eq!(controller.descriptor_tree(E1).unwrap().len(), 10);
}

#[test]
fn test_caller_read_descriptor_updates_cache() {
    let (controller, mut events, link) = controller(false);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    let now = Instant::now();
    controller.handle_frame_at(&e1.advertisement(), now);

    controller
        .send(E1, read(DescriptorType::ClockDomain, 0), NotificationId(1))
        .unwrap();
    exchange(&controller, &link, &mut [&mut e1], now);

    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, Event::Notification(n) if n.outcome.is_success())));
    let domain = controller.clock_domain(E1, 0).descriptor().unwrap();
    assert_eq!(domain.clock_source_index(), 1);
}

#[test]
fn test_caller_read_collides_with_enumeration() {
    let (controller, _events, _link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    controller.handle_frame_at(&e1.advertisement(), Instant::now());

    // ENTITY 0 is being read by the enumeration
    assert!(matches!(
        controller.send(E1, read(DescriptorType::Entity, 0), NotificationId(1)),
        Err(StateError::DuplicateCommand { .. })
    ));
    controller
        .send(E1, read(DescriptorType::ClockDomain, 0), NotificationId(1))
        .unwrap();
}

#[test]
fn test_large_configuration_is_read_in_a_bounded_window() {
    let (controller, _events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    e1.set_descriptor_counts(vec![
        (DescriptorType::AudioUnit, u16::MAX),
        (DescriptorType::StreamInput, u16::MAX),
    ]);
    let now = Instant::now();

    controller.handle_frame_at(&e1.advertisement(), now);
    assert_eq!(respond_once(&controller, &link, &mut e1, now), 1);
    assert_eq!(respond_once(&controller, &link, &mut e1, now), 1);
    assert_eq!(controller.pending_count(), MAX_READS_IN_FLIGHT);
    assert_eq!(link.transmitted_count(), MAX_READS_IN_FLIGHT);

    // Each answer lets one more queued read out
    assert_eq!(respond_once(&controller, &link, &mut e1, now), MAX_READS_IN_FLIGHT);
    assert_eq!(controller.pending_count(), MAX_READS_IN_FLIGHT);
    assert!(controller.is_enumerating(E1));

    controller
        .clock_domain(E1, 0)
        .request_get_clock_source(NotificationId(1))
        .unwrap();
    assert_eq!(controller.pending_count(), MAX_READS_IN_FLIGHT + 1);
}

#[test]
fn test_window_refills_until_every_read_resolves() {
    let (controller, mut events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    e1.set_descriptor_counts(vec![(DescriptorType::StreamInput, 40)]);
    let now = Instant::now();

    controller.handle_frame_at(&e1.advertisement(), now);
    let reads = exchange(&controller, &link, &mut [&mut e1], now);

    assert_eq!(reads, 42);
    assert!(drain(&mut events).contains(&Event::EnumerationComplete {
        entity_id: E1,
        descriptors: 4,
        failed_reads: 38,
    }));
    assert_eq!(controller.pending_count(), 0);
}

#[test]
fn test_value_confirmed_during_enumeration_survives_publication() {
    let (controller, mut events, link) = controller(true);
    let mut e1 = SimulatedEntity::new(E1, E1_MAC, 0);
    let now = Instant::now();
    controller.handle_frame_at(&e1.advertisement(), now);
    exchange(&controller, &link, &mut [&mut e1], now);
    assert_eq!(controller.clock_domain(E1, 0).descriptor().unwrap().clock_source_index(), 1);

    controller.enumerate(E1).unwrap();
    respond_once(&controller, &link, &mut e1, now);
    respond_once(&controller, &link, &mut e1, now);

    // Answer every descriptor read but the AUDIO_UNIT one
    let (held, answered): (Vec<_>, Vec<_>) = link
        .take_transmitted()
        .into_iter()
        .partition(|frame| is_read_of(frame, DescriptorType::AudioUnit));
    assert_eq!(held.len(), 1);
    for frame in &answered {
        for response in e1.respond(frame) {
            controller.handle_frame_at(&response, now);
        }
    }
    assert!(controller.is_enumerating(E1));

    controller
        .clock_domain(E1, 0)
        .request_set_clock_source(NotificationId(42), 2)
        .unwrap();
    respond_once(&controller, &link, &mut e1, now);
    assert_eq!(controller.clock_domain(E1, 0).descriptor().unwrap().clock_source_index(), 2);

    for response in e1.respond(&held[0]) {
        controller.handle_frame_at(&response, now);
    }
    assert!(!controller.is_enumerating(E1));
    assert!(matches!(
        drain(&mut events).last(),
        Some(Event::EnumerationComplete { descriptors: 10, .. })
    ));
    assert_eq!(controller.clock_domain(E1, 0).descriptor().unwrap().clock_source_index(), 2);
}
