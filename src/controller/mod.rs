//! AVDECC Controller
//!
//! [`Controller`] ties the protocol pieces together. Frames received from the
//! network are fed to [`Controller::handle_frame`] (or pulled from the data
//! link with [`Controller::poll`]); [`Controller::tick`] drives the liveness
//! sweep, command retries and periodic self-advertisement. Callers issue
//! commands with [`Controller::send`] or through the descriptor handles, get
//! an immediate [`Accepted`] or [`StateError`], and later exactly one
//! [`Notification`] on the event channel.
//!
//! # Locking
//!
//! All mutable state sits behind one mutex and the data link behind a second
//! one. The two are never held together: frames are built under the state
//! lock and transmitted after it is released. Events are sent while the state
//! lock is held so that they reach the channel in the order they happened.
//!
//! # Example
//!
//! ```
//! use avdecc_rs::controller::{Controller, ControllerConfig, NotificationId};
//! use avdecc_rs::datalink::EthernetDataLink;
//! use avdecc_rs::error::StateError;
//! use avdecc_rs::pdu::EntityId;
//!
//! let mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
//! let config = ControllerConfig::new(EntityId(0x0200_00ff_fe00_0001), mac);
//! let (controller, _events) = Controller::new(config, EthernetDataLink::new(mac));
//!
//! let unknown = EntityId(0x0011_2233_4455_6677);
//! let result = controller
//!     .clock_domain(unknown, 0)
//!     .request_set_clock_source(NotificationId(42), 2);
//! assert!(matches!(result, Err(StateError::UnknownEntity(_))));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::acmp::{AcmpCommand, AcmpMessageType, AcmpStatus, Acmpdu};
use crate::adp::{
    build_advertisement, build_discover, parse_adpdu, AdpMessageType, EntityInfo, LocalEntity,
};
use crate::aecp::{AemCommand, AemCommandType, AemPdu, AemResponse, AemStatus};
use crate::datalink::ethernet::EthernetFrame;
use crate::datalink::{DataLink, DataLinkError, MacAddress};
use crate::descriptor::{
    AudioUnitDescriptor, ClockDomainDescriptor, DescriptorTree, DescriptorType, StreamDescriptor,
};
use crate::error::{ProtocolStatusError, StateError, TimeoutError};
use crate::pdu::{peek_subtype, EntityId, Subtype};
use crate::registry::{DiscoveryEvent, EntityRecord, EntityRegistry, RegistryStatistics};
use crate::util::lock;
use crate::util::statistics::CommunicationStats;

pub mod enumeration;
pub mod pending;

pub use enumeration::EnumerationJob;
pub use pending::{CommandOrigin, PendingCommand, PendingCommandTable};

/// Controller defaults
pub mod constants {
    use std::time::Duration;

    /// AEM command timeout (IEEE 1722.1-2013 9.2.1.2.5)
    pub const AECP_COMMAND_TIMEOUT: Duration = Duration::from_millis(250);

    /// Retransmissions before a command times out
    pub const MAX_RETRIES: u32 = 1;

    /// Valid time advertised by the controller, in 2 s units
    pub const ADVERTISE_VALID_TIME: u8 = 31;

    /// Interval between self-advertisements, a quarter of the valid time
    pub const ADVERTISE_INTERVAL: Duration = Duration::from_secs(15);

    /// Timer resolution of the background driver
    pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

    /// Entity model id advertised by the controller
    pub const CONTROLLER_ENTITY_MODEL_ID: u64 = 0;
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerConfig {
    /// Our entity id, used as controller_entity_id in every command
    pub entity_id: EntityId,
    pub entity_model_id: u64,
    /// MAC address frames are sent from
    pub local_mac: MacAddress,
    pub aecp_timeout: Duration,
    /// Retransmissions of a silent command, AECP and ACMP alike
    pub max_retries: u32,
    /// Read the descriptors of every discovered or restarted entity
    pub auto_enumerate: bool,
    /// Advertise ourselves this often; `None` keeps the controller silent
    pub advertise_interval: Option<Duration>,
    /// Valid time for our advertisements, in 2 s units
    pub advertise_valid_time: u8,
    /// How often the background driver polls and ticks
    pub tick_interval: Duration,
}

impl ControllerConfig {
    pub fn new(entity_id: EntityId, local_mac: MacAddress) -> Self {
        Self {
            entity_id,
            local_mac,
            ..Default::default()
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            entity_id: EntityId::NULL,
            entity_model_id: constants::CONTROLLER_ENTITY_MODEL_ID,
            local_mac: [0; 6],
            aecp_timeout: constants::AECP_COMMAND_TIMEOUT,
            max_retries: constants::MAX_RETRIES,
            auto_enumerate: true,
            advertise_interval: None,
            advertise_valid_time: constants::ADVERTISE_VALID_TIME,
            tick_interval: constants::TICK_INTERVAL,
        }
    }
}

/// Caller-chosen tag that comes back on the command's notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A command for a remote entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Aem(AemCommand),
    Acmp(AcmpCommand),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Aem(command) => CommandKind::Aem(command.command_type()),
            Command::Acmp(command) => CommandKind::Acmp(command.message_type()),
        }
    }

    /// The descriptor or stream the command addresses
    pub fn target(&self) -> Option<(DescriptorType, u16)> {
        match self {
            Command::Aem(command) => command.target(),
            Command::Acmp(command) => Some(command.target()),
        }
    }

    fn timeout(&self, config: &ControllerConfig) -> Duration {
        match self {
            Command::Aem(_) => config.aecp_timeout,
            Command::Acmp(command) => command.message_type().default_timeout(),
        }
    }
}

impl From<AemCommand> for Command {
    fn from(command: AemCommand) -> Self {
        Command::Aem(command)
    }
}

impl From<AcmpCommand> for Command {
    fn from(command: AcmpCommand) -> Self {
        Command::Acmp(command)
    }
}

/// Command type, AEM command or ACMP command message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Aem(AemCommandType),
    Acmp(AcmpMessageType),
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Aem(command_type) => write!(f, "AEM {}", command_type),
            CommandKind::Acmp(message_type) => write!(f, "ACMP {}", message_type),
        }
    }
}

/// Status carried by a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Aem(AemStatus),
    Acmp(AcmpStatus),
}

impl CommandStatus {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CommandStatus::Aem(AemStatus::Success) | CommandStatus::Acmp(AcmpStatus::Success)
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Aem(status) => write!(f, "{}", status),
            CommandStatus::Acmp(status) => write!(f, "{}", status),
        }
    }
}

/// Payload of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Aem(AemResponse),
    Acmp(Acmpdu),
}

/// How an accepted command ended
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Success(CommandResult),
    Failed(ProtocolStatusError),
    TimedOut(TimeoutError),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success(_))
    }
}

/// The single terminal result of an accepted command
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub notification_id: NotificationId,
    pub entity_id: EntityId,
    pub command: CommandKind,
    pub outcome: CommandOutcome,
}

/// Everything the controller reports
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Discovery(DiscoveryEvent),
    /// A descriptor tree was read and published
    EnumerationComplete {
        entity_id: EntityId,
        descriptors: usize,
        failed_reads: usize,
    },
    Notification(Notification),
    /// An entity reported a change on its own
    Unsolicited {
        entity_id: EntityId,
        response: AemResponse,
    },
}

/// A command was queued and transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub sequence_id: u16,
}

struct ControllerState {
    registry: EntityRegistry,
    pending: PendingCommandTable,
    enumerations: HashMap<EntityId, EnumerationJob>,
    local: LocalEntity,
    stats: CommunicationStats,
    advertising: bool,
    last_advertisement: Option<Instant>,
}

/// AVDECC controller
pub struct Controller {
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    link: Mutex<Box<dyn DataLink>>,
    events: UnboundedSender<Event>,
}

impl Controller {
    /// Create a controller on `link`. Events arrive on the returned receiver.
    pub fn new(config: ControllerConfig, link: impl DataLink + 'static) -> (Self, UnboundedReceiver<Event>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let mut info = EntityInfo::new(config.entity_id, config.entity_model_id);
        info.controller_capabilities = crate::adp::ControllerCapabilities::IMPLEMENTED;
        info.valid_time = config.advertise_valid_time;

        let state = ControllerState {
            registry: EntityRegistry::new(),
            pending: PendingCommandTable::new(),
            enumerations: HashMap::new(),
            local: LocalEntity::new(info),
            stats: CommunicationStats::new(),
            advertising: config.advertise_interval.is_some(),
            last_advertisement: None,
        };
        let controller = Self {
            config,
            state: Mutex::new(state),
            link: Mutex::new(Box::new(link)),
            events,
        };
        (controller, receiver)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn entity_id(&self) -> EntityId {
        self.config.entity_id
    }

    /// Send `command` to `entity_id`.
    ///
    /// Fails without transmitting if the entity is unknown or not available,
    /// if the same kind of command is already pending against the same
    /// descriptor, or if `notification_id` is still in flight. Otherwise the
    /// command is transmitted and exactly one [`Notification`] tagged
    /// `notification_id` follows, unless the command is cancelled first.
    pub fn send(
        &self,
        entity_id: EntityId,
        command: impl Into<Command>,
        notification_id: NotificationId,
    ) -> Result<Accepted, StateError> {
        self.send_checked(entity_id, command.into(), notification_id, |_| Ok(()))
    }

    /// [`send`](Self::send) with a check against the entity's descriptor
    /// tree, made under the same lock that queues the command
    fn send_checked(
        &self,
        entity_id: EntityId,
        command: Command,
        notification_id: NotificationId,
        check: impl FnOnce(&DescriptorTree) -> Result<(), StateError>,
    ) -> Result<Accepted, StateError> {
        let now = Instant::now();
        let (frame, sequence_id) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let record = state
                .registry
                .get(entity_id)
                .ok_or(StateError::UnknownEntity(entity_id))?;
            if !record.is_available() {
                return Err(StateError::EntityNotAvailable(entity_id));
            }
            check(&*record.descriptors())?;

            let kind = command.kind();
            let target = command.target();
            if state.pending.find_duplicate(entity_id, kind, target).is_some() {
                let (descriptor_type, descriptor_index) = target.unwrap_or_default();
                return Err(StateError::DuplicateCommand {
                    entity_id,
                    command: kind,
                    descriptor_type,
                    descriptor_index,
                });
            }
            if state.pending.contains_notification(notification_id) {
                return Err(StateError::DuplicateNotificationId(notification_id));
            }

            let Some(sequence_id) = state.pending.next_sequence_id(entity_id) else {
                return Err(StateError::SequenceIdsExhausted(entity_id));
            };
            let frame = self.command_frame(record, &command, sequence_id);
            debug!(
                "Sending {} to {} (seq {}, notification {})",
                kind, entity_id, sequence_id, notification_id
            );
            let timeout = command.timeout(&self.config);
            state.pending.insert(PendingCommand::new(
                entity_id,
                sequence_id,
                command,
                CommandOrigin::Caller(notification_id),
                frame.clone(),
                timeout,
                now,
            ));
            (frame, sequence_id)
        };

        if let Err(e) = self.transmit(&frame) {
            error!("Failed to send command to {}: {}", entity_id, e);
            let mut state = lock(&self.state);
            state.pending.cancel(notification_id);
            return Err(StateError::Transmit(e));
        }
        Ok(Accepted { sequence_id })
    }

    /// Encode a command for `record`'s entity
    fn command_frame(&self, record: &EntityRecord, command: &Command, sequence_id: u16) -> Vec<u8> {
        let entity_id = record.entity_id();
        let frame = match command {
            Command::Aem(aem) => AemPdu::command(entity_id, self.config.entity_id, sequence_id, aem)
                .to_frame(record.source_mac(), self.config.local_mac),
            Command::Acmp(acmp) => acmp
                .to_pdu(entity_id, self.config.entity_id, sequence_id)
                .to_frame(self.config.local_mac),
        };
        frame.encode()
    }

    /// Withdraw a pending command. No notification is sent for it and a late
    /// response is treated as unmatched. Returns false if nothing was pending
    /// under `notification_id`, e.g. because it already resolved.
    pub fn cancel(&self, notification_id: NotificationId) -> bool {
        let cancelled = lock(&self.state).pending.cancel(notification_id);
        if let Some(pending) = &cancelled {
            debug!(
                "Cancelled {} to {} (notification {})",
                pending.kind(),
                pending.entity_id,
                notification_id
            );
        }
        cancelled.is_some()
    }

    /// Process one received frame
    pub fn handle_frame(&self, data: &[u8]) {
        self.handle_frame_at(data, Instant::now());
    }

    /// Process one received frame as if it arrived at `now`. Malformed frames
    /// are logged and dropped.
    pub fn handle_frame_at(&self, data: &[u8], now: Instant) {
        let outgoing = {
            let mut state = lock(&self.state);
            state.stats.record_received(data.len());
            match EthernetFrame::decode(data) {
                Ok(frame) => self.dispatch(&mut state, &frame, now),
                Err(e) => {
                    state.stats.record_malformed();
                    debug!("Dropping frame: {}\n{}", e, crate::util::hex_dump(data, "  "));
                    Vec::new()
                }
            }
        };
        self.transmit_all(outgoing);
    }

    fn dispatch(&self, state: &mut ControllerState, frame: &EthernetFrame, now: Instant) -> Vec<Vec<u8>> {
        let result = match peek_subtype(&frame.payload) {
            Ok(Subtype::Adp) => parse_adpdu(frame).map(|adpdu| self.handle_adp(state, adpdu, now)),
            Ok(Subtype::Aecp) => {
                AemPdu::decode(&frame.payload).map(|pdu| self.handle_aecp(state, pdu, now))
            }
            Ok(Subtype::Acmp) => Acmpdu::decode(&frame.payload).map(|pdu| self.handle_acmp(state, pdu)),
            Err(e) => Err(e),
        };
        match result {
            Ok(outgoing) => outgoing,
            Err(e) => {
                state.stats.record_malformed();
                warn!(
                    "Dropping malformed PDU from {}: {}\n{}",
                    crate::datalink::ethernet::format_mac_address(&frame.src_mac),
                    e,
                    crate::util::hex_dump(&frame.payload, "  ")
                );
                Vec::new()
            }
        }
    }

    fn handle_adp(&self, state: &mut ControllerState, adpdu: crate::adp::Adpdu, now: Instant) -> Vec<Vec<u8>> {
        let entity_id = adpdu.entity_id();
        match adpdu.message_type() {
            AdpMessageType::EntityDiscover => {
                let for_us = entity_id.is_null() || entity_id == self.config.entity_id;
                if for_us && state.advertising {
                    debug!("Answering ENTITY_DISCOVER");
                    return vec![self.advertisement(state, now)];
                }
                Vec::new()
            }
            _ if entity_id == self.config.entity_id => {
                trace!("Ignoring our own advertisement");
                Vec::new()
            }
            AdpMessageType::EntityAvailable => {
                let Some(event) = state.registry.observe_advertisement(adpdu, now) else {
                    return Vec::new();
                };
                self.emit(Event::Discovery(event));
                match event {
                    DiscoveryEvent::Discovered(id) | DiscoveryEvent::Restarted(id)
                        if self.config.auto_enumerate =>
                    {
                        self.start_enumeration(state, id, now)
                    }
                    DiscoveryEvent::Restarted(id) => {
                        self.abort_enumeration(state, id);
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            AdpMessageType::EntityDeparting => {
                if let Some(event) = state.registry.observe_departing(entity_id) {
                    self.abort_enumeration(state, entity_id);
                    self.emit(Event::Discovery(event));
                }
                Vec::new()
            }
        }
    }

    fn handle_aecp(&self, state: &mut ControllerState, pdu: AemPdu, now: Instant) -> Vec<Vec<u8>> {
        if !pdu.is_response() {
            trace!("Ignoring AEM command {} from {}", pdu.command_type, pdu.controller_entity_id);
            return Vec::new();
        }
        if pdu.controller_entity_id != self.config.entity_id {
            trace!("Ignoring AEM response for controller {}", pdu.controller_entity_id);
            return Vec::new();
        }
        let entity_id = pdu.target_entity_id;
        if pdu.unsolicited {
            self.handle_unsolicited(state, pdu);
            return Vec::new();
        }

        let kind = CommandKind::Aem(pdu.command_type);
        let matched = state
            .pending
            .get(entity_id, pdu.sequence_id)
            .is_some_and(|pending| pending.kind() == kind);
        if !matched {
            return self.unmatched(state, entity_id, pdu.sequence_id, kind);
        }

        if pdu.status == AemStatus::InProgress {
            debug!("{} to {} in progress (seq {})", kind, entity_id, pdu.sequence_id);
            state.pending.restart_timer(entity_id, pdu.sequence_id, kind, now);
            return Vec::new();
        }

        let outcome = if pdu.status == AemStatus::Success {
            match AemResponse::decode(pdu.command_type, &pdu.payload) {
                Ok(response) => {
                    let expected = state
                        .pending
                        .get(entity_id, pdu.sequence_id)
                        .and_then(|pending| pending.command.target());
                    if response.target() != expected {
                        // Treated like a malformed response
                        state.stats.record_malformed();
                        warn!(
                            "{} response from {} (seq {}) is for {:?}, expected {:?}",
                            kind,
                            entity_id,
                            pdu.sequence_id,
                            response.target(),
                            expected
                        );
                        return Vec::new();
                    }
                    Ok(response)
                }
                Err(e) => {
                    // Leave the command pending; it is retried and times out
                    state.stats.record_malformed();
                    warn!(
                        "Malformed {} response from {}: {}\n{}",
                        kind,
                        entity_id,
                        e,
                        crate::util::hex_dump(&pdu.payload, "  ")
                    );
                    return Vec::new();
                }
            }
        } else {
            Err(CommandStatus::Aem(pdu.status))
        };

        let Some(pending) = state.pending.take(entity_id, pdu.sequence_id, kind) else {
            return Vec::new();
        };
        state.stats.record_response(outcome.is_ok());

        match pending.origin {
            CommandOrigin::Enumeration => self.enumeration_result(state, entity_id, &pending, outcome, now),
            CommandOrigin::Caller(notification_id) => {
                let outcome = match outcome {
                    Ok(response) => {
                        self.apply_response(state, entity_id, &response);
                        CommandOutcome::Success(CommandResult::Aem(response))
                    }
                    Err(status) => CommandOutcome::Failed(ProtocolStatusError {
                        entity_id,
                        command: kind,
                        status,
                    }),
                };
                self.notify(notification_id, entity_id, kind, outcome);
                Vec::new()
            }
        }
    }

    fn handle_unsolicited(&self, state: &mut ControllerState, pdu: AemPdu) {
        let entity_id = pdu.target_entity_id;
        if !state.registry.contains(entity_id) || pdu.status != AemStatus::Success {
            trace!("Ignoring unsolicited {} from {}", pdu.command_type, entity_id);
            return;
        }
        match AemResponse::decode(pdu.command_type, &pdu.payload) {
            Ok(response) => {
                debug!("Unsolicited {} from {}", pdu.command_type, entity_id);
                self.apply_response(state, entity_id, &response);
                self.emit(Event::Unsolicited { entity_id, response });
            }
            Err(e) => {
                state.stats.record_malformed();
                warn!("Malformed unsolicited {} from {}: {}", pdu.command_type, entity_id, e);
            }
        }
    }

    fn handle_acmp(&self, state: &mut ControllerState, pdu: Acmpdu) -> Vec<Vec<u8>> {
        if !pdu.message_type.is_response() || pdu.controller_entity_id != self.config.entity_id {
            trace!("Ignoring ACMP {} from controller {}", pdu.message_type, pdu.controller_entity_id);
            return Vec::new();
        }
        let entity_id = pdu.responder();
        let kind = CommandKind::Acmp(pdu.message_type.command_type());
        let Some(pending) = state.pending.take(entity_id, pdu.sequence_id, kind) else {
            return self.unmatched(state, entity_id, pdu.sequence_id, kind);
        };

        let success = pdu.status == AcmpStatus::Success;
        state.stats.record_response(success);
        let outcome = if success {
            CommandOutcome::Success(CommandResult::Acmp(pdu))
        } else {
            CommandOutcome::Failed(ProtocolStatusError {
                entity_id,
                command: kind,
                status: CommandStatus::Acmp(pdu.status),
            })
        };
        if let Some(notification_id) = pending.notification_id() {
            self.notify(notification_id, entity_id, kind, outcome);
        }
        Vec::new()
    }

    fn unmatched(&self, state: &mut ControllerState, entity_id: EntityId, sequence_id: u16, kind: CommandKind) -> Vec<Vec<u8>> {
        state.stats.record_unmatched();
        debug!(
            "Discarding unmatched {} response from {} (seq {})",
            kind, entity_id, sequence_id
        );
        Vec::new()
    }

    /// Copy a confirmed value into the entity's descriptor tree, and into the
    /// tree of an enumeration still running so publishing it keeps the value
    fn apply_response(&self, state: &mut ControllerState, entity_id: EntityId, response: &AemResponse) {
        let applied = state
            .registry
            .update_descriptor_tree(entity_id, |tree| apply_to_tree(tree, response));
        if let Some(job) = state.enumerations.get_mut(&entity_id) {
            apply_to_tree(job.tree_mut(), response);
        }
        if applied == Some(false) {
            debug!("{} has no cached descriptor for {:?}", entity_id, response);
        }
    }

    fn start_enumeration(&self, state: &mut ControllerState, entity_id: EntityId, now: Instant) -> Vec<Vec<u8>> {
        self.abort_enumeration(state, entity_id);
        info!("Enumerating descriptors of {}", entity_id);
        state.enumerations.insert(entity_id, EnumerationJob::start(entity_id));
        self.continue_enumeration(state, entity_id, now)
    }

    fn abort_enumeration(&self, state: &mut ControllerState, entity_id: EntityId) {
        if state.enumerations.remove(&entity_id).is_some() {
            let dropped = state.pending.remove_enumeration(entity_id);
            debug!("Abandoned enumeration of {} ({} reads pending)", entity_id, dropped);
        }
    }

    /// Fill the job's window of reads, then publish the tree if nothing is left
    fn continue_enumeration(&self, state: &mut ControllerState, entity_id: EntityId, now: Instant) -> Vec<Vec<u8>> {
        let Some(record) = state.registry.get(entity_id).cloned() else {
            return Vec::new();
        };
        let mut frames = Vec::new();
        loop {
            let Some(job) = state.enumerations.get_mut(&entity_id) else {
                break;
            };
            let reads = job.next_reads();
            if reads.is_empty() {
                break;
            }
            for read in reads {
                let Some(sequence_id) = state.pending.next_sequence_id(entity_id) else {
                    warn!("No sequence id left for enumeration of {}", entity_id);
                    if let Some(job) = state.enumerations.get_mut(&entity_id) {
                        job.on_failure(&read);
                    }
                    continue;
                };
                let command = Command::Aem(read);
                let frame = self.command_frame(&record, &command, sequence_id);
                state.pending.insert(PendingCommand::new(
                    entity_id,
                    sequence_id,
                    command,
                    CommandOrigin::Enumeration,
                    frame.clone(),
                    self.config.aecp_timeout,
                    now,
                ));
                frames.push(frame);
            }
        }
        self.finish_enumeration(state, entity_id);
        frames
    }

    fn enumeration_result(
        &self,
        state: &mut ControllerState,
        entity_id: EntityId,
        pending: &PendingCommand,
        outcome: Result<AemResponse, CommandStatus>,
        now: Instant,
    ) -> Vec<Vec<u8>> {
        let Some(job) = state.enumerations.get_mut(&entity_id) else {
            return Vec::new();
        };
        match (outcome, &pending.command) {
            (
                Ok(AemResponse::ReadDescriptor {
                    configuration_index,
                    descriptor,
                }),
                _,
            ) => job.on_descriptor(configuration_index, descriptor),
            (Err(status), Command::Aem(command)) => {
                debug!("READ_DESCRIPTOR to {} failed: {}", entity_id, status);
                job.on_failure(command);
            }
            (_, Command::Aem(command)) => job.on_failure(command),
            (_, Command::Acmp(_)) => {}
        }
        self.continue_enumeration(state, entity_id, now)
    }

    /// Publish the tree if the job has no reads left
    fn finish_enumeration(&self, state: &mut ControllerState, entity_id: EntityId) {
        if !state
            .enumerations
            .get(&entity_id)
            .is_some_and(EnumerationJob::is_complete)
        {
            return;
        }
        let Some(job) = state.enumerations.remove(&entity_id) else {
            return;
        };
        let failed_reads = job.failed();
        let tree = job.into_tree();
        let descriptors = tree.len();
        state.registry.replace_descriptor_tree(entity_id, tree);
        info!(
            "Enumerated {}: {} descriptors, {} failed reads",
            entity_id, descriptors, failed_reads
        );
        self.emit(Event::EnumerationComplete {
            entity_id,
            descriptors,
            failed_reads,
        });
    }

    /// Run timers as of now
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Run timers as of `now`: expire silent entities, retry or time out
    /// commands, and advertise if due
    pub fn tick_at(&self, now: Instant) {
        let outgoing = {
            let mut state = lock(&self.state);
            let mut outgoing = Vec::new();

            for entity_id in state.registry.sweep(now) {
                self.abort_enumeration(&mut state, entity_id);
                self.emit(Event::Discovery(DiscoveryEvent::Departed(entity_id)));
            }

            let timers = state.pending.check_timeouts(now, self.config.max_retries);
            for (entity_id, sequence_id, frame) in timers.retransmit {
                debug!("Retrying seq {} to {}", sequence_id, entity_id);
                state.stats.record_retry();
                outgoing.push(frame);
            }
            for pending in timers.expired {
                state.stats.record_timeout();
                let entity_id = pending.entity_id;
                let kind = pending.kind();
                warn!(
                    "{} to {} timed out after {} retries (seq {})",
                    kind, entity_id, pending.retries, pending.sequence_id
                );
                match pending.origin {
                    CommandOrigin::Caller(notification_id) => {
                        let error = TimeoutError {
                            entity_id,
                            command: kind,
                            retries: pending.retries,
                        };
                        self.notify(notification_id, entity_id, kind, CommandOutcome::TimedOut(error));
                    }
                    CommandOrigin::Enumeration => {
                        if let Some(job) = state.enumerations.get_mut(&entity_id) {
                            if let Command::Aem(command) = &pending.command {
                                job.on_failure(command);
                            }
                        }
                        outgoing.extend(self.continue_enumeration(&mut state, entity_id, now));
                    }
                }
            }

            if let (Some(interval), true) = (self.config.advertise_interval, state.advertising) {
                let due = state
                    .last_advertisement
                    .map_or(true, |last| now.saturating_duration_since(last) >= interval);
                if due {
                    outgoing.push(self.advertisement(&mut state, now));
                }
            }
            outgoing
        };
        self.transmit_all(outgoing);
    }

    /// Receive and handle every frame waiting on the data link. Returns the
    /// number of frames handled.
    pub fn poll(&self) -> Result<usize, DataLinkError> {
        let mut handled = 0;
        loop {
            let frame = lock(&self.link).receive_frame()?;
            match frame {
                Some(frame) => {
                    self.handle_frame(&frame);
                    handled += 1;
                }
                None => return Ok(handled),
            }
        }
    }

    /// Send ENTITY_DISCOVER; a null `target` asks every entity to advertise
    pub fn discover(&self, target: EntityId) -> Result<(), DataLinkError> {
        debug!("Sending ENTITY_DISCOVER for {}", target);
        let frame = build_discover(target, self.config.local_mac).encode();
        self.transmit(&frame)
    }

    /// Advertise the controller now. Periodic advertising, if configured,
    /// resumes after a [`shutdown_advertisement`](Self::shutdown_advertisement).
    pub fn advertise(&self) -> Result<(), DataLinkError> {
        let frame = {
            let mut state = lock(&self.state);
            state.advertising = self.config.advertise_interval.is_some();
            self.advertisement(&mut state, Instant::now())
        };
        self.transmit(&frame)
    }

    /// Announce that the controller is leaving and stop periodic advertising
    /// until the next [`advertise`](Self::advertise)
    pub fn shutdown_advertisement(&self) -> Result<(), DataLinkError> {
        let frame = {
            let mut state = lock(&self.state);
            state.advertising = false;
            build_advertisement(
                &mut state.local,
                AdpMessageType::EntityDeparting,
                self.config.local_mac,
            )
            .encode()
        };
        info!("Controller {} departing", self.config.entity_id);
        self.transmit(&frame)
    }

    /// Change what the controller advertises. The next advertisement carries
    /// an incremented available_index if anything changed.
    pub fn update_local_entity(&self, update: impl FnOnce(&mut EntityInfo)) {
        update(&mut lock(&self.state).local.info);
    }

    fn advertisement(&self, state: &mut ControllerState, now: Instant) -> Vec<u8> {
        state.last_advertisement = Some(now);
        build_advertisement(
            &mut state.local,
            AdpMessageType::EntityAvailable,
            self.config.local_mac,
        )
        .encode()
    }

    /// Handle for one CLOCK_DOMAIN of an entity
    pub fn clock_domain(&self, entity_id: EntityId, clock_domain_index: u16) -> ClockDomainHandle<'_> {
        ClockDomainHandle {
            controller: self,
            entity_id,
            clock_domain_index,
        }
    }

    /// Handle for one AUDIO_UNIT of an entity
    pub fn audio_unit(&self, entity_id: EntityId, audio_unit_index: u16) -> AudioUnitHandle<'_> {
        AudioUnitHandle {
            controller: self,
            entity_id,
            audio_unit_index,
        }
    }

    /// Handle for one STREAM_INPUT or STREAM_OUTPUT of an entity
    pub fn stream(&self, entity_id: EntityId, descriptor_type: DescriptorType, descriptor_index: u16) -> StreamHandle<'_> {
        StreamHandle {
            controller: self,
            entity_id,
            descriptor_type,
            descriptor_index,
        }
    }

    /// Snapshot of one entity's record
    pub fn entity(&self, entity_id: EntityId) -> Option<EntityRecord> {
        lock(&self.state).registry.get(entity_id).cloned()
    }

    pub fn is_available(&self, entity_id: EntityId) -> bool {
        lock(&self.state).registry.is_available(entity_id)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        lock(&self.state).registry.entity_ids()
    }

    pub fn available_entities(&self) -> Vec<EntityId> {
        lock(&self.state).registry.available_entities()
    }

    /// The entity's descriptor tree as of now. Later updates do not change it.
    pub fn descriptor_tree(&self, entity_id: EntityId) -> Option<Arc<DescriptorTree>> {
        lock(&self.state).registry.descriptor_tree(entity_id)
    }

    /// Start (or restart) reading an entity's descriptors
    pub fn enumerate(&self, entity_id: EntityId) -> Result<(), StateError> {
        let outgoing = {
            let mut state = lock(&self.state);
            if !state.registry.contains(entity_id) {
                return Err(StateError::UnknownEntity(entity_id));
            }
            if !state.registry.is_available(entity_id) {
                return Err(StateError::EntityNotAvailable(entity_id));
            }
            self.start_enumeration(&mut state, entity_id, Instant::now())
        };
        self.transmit_all(outgoing);
        Ok(())
    }

    pub fn is_enumerating(&self, entity_id: EntityId) -> bool {
        lock(&self.state).enumerations.contains_key(&entity_id)
    }

    /// Forget departed entities. Returns how many were removed.
    pub fn purge_departed(&self) -> usize {
        lock(&self.state).registry.purge_departed()
    }

    /// Commands waiting for a response, enumeration reads included
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn statistics(&self) -> CommunicationStats {
        lock(&self.state).stats.clone()
    }

    pub fn registry_statistics(&self) -> RegistryStatistics {
        lock(&self.state).registry.statistics()
    }

    fn notify(&self, notification_id: NotificationId, entity_id: EntityId, command: CommandKind, outcome: CommandOutcome) {
        debug!(
            "Notification {}: {} to {} {}",
            notification_id,
            command,
            entity_id,
            if outcome.is_success() { "succeeded" } else { "failed" }
        );
        self.emit(Event::Notification(Notification {
            notification_id,
            entity_id,
            command,
            outcome,
        }));
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    fn transmit(&self, frame: &[u8]) -> Result<(), DataLinkError> {
        let result = lock(&self.link).send_frame(frame);
        let mut state = lock(&self.state);
        match &result {
            Ok(()) => state.stats.record_sent(frame.len()),
            Err(_) => state.stats.record_transmit_error(),
        }
        result
    }

    fn transmit_all(&self, frames: Vec<Vec<u8>>) {
        for frame in frames {
            if let Err(e) = self.transmit(&frame) {
                error!("Transmit failed: {}", e);
            }
        }
    }
}

/// Write a confirmed value into `tree`. Returns false if the descriptor is
/// not in it.
fn apply_to_tree(tree: &mut DescriptorTree, response: &AemResponse) -> bool {
    match response {
        AemResponse::ClockSource {
            clock_domain_index,
            clock_source_index,
        } => tree.apply_clock_source(*clock_domain_index, *clock_source_index),
        AemResponse::SamplingRate {
            descriptor_type: DescriptorType::AudioUnit,
            descriptor_index,
            sampling_rate,
        } => tree.apply_sampling_rate(*descriptor_index, *sampling_rate),
        AemResponse::StreamFormat {
            descriptor_type,
            descriptor_index,
            stream_format,
        } => tree.apply_stream_format(*descriptor_type, *descriptor_index, *stream_format),
        AemResponse::ReadDescriptor {
            configuration_index,
            descriptor,
        } => {
            tree.insert(*configuration_index, descriptor.clone());
            true
        }
        _ => true,
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("entity_id", &self.config.entity_id)
            .field("local_mac", &crate::datalink::ethernet::format_mac_address(&self.config.local_mac))
            .finish_non_exhaustive()
    }
}

/// Commands for one CLOCK_DOMAIN
#[derive(Debug, Clone, Copy)]
pub struct ClockDomainHandle<'a> {
    controller: &'a Controller,
    entity_id: EntityId,
    clock_domain_index: u16,
}

impl ClockDomainHandle<'_> {
    /// The cached descriptor, if it has been read
    pub fn descriptor(&self) -> Option<ClockDomainDescriptor> {
        self.controller
            .descriptor_tree(self.entity_id)?
            .clock_domain(self.clock_domain_index)
            .cloned()
    }

    /// Select a new clock source. A source not listed by the domain is
    /// rejected with [`StateError::InvalidClockSource`] and nothing is sent.
    pub fn request_set_clock_source(
        &self,
        notification_id: NotificationId,
        clock_source_index: u16,
    ) -> Result<Accepted, StateError> {
        let entity_id = self.entity_id;
        let clock_domain_index = self.clock_domain_index;
        self.controller.send_checked(
            entity_id,
            Command::Aem(AemCommand::SetClockSource {
                clock_domain_index,
                clock_source_index,
            }),
            notification_id,
            |tree| {
                let domain = tree.clock_domain(clock_domain_index).ok_or(StateError::NoSuchDescriptor {
                    entity_id,
                    descriptor_type: DescriptorType::ClockDomain,
                    descriptor_index: clock_domain_index,
                })?;
                if !domain.is_valid_clock_source(clock_source_index) {
                    return Err(StateError::InvalidClockSource {
                        clock_domain_index,
                        requested: clock_source_index,
                    });
                }
                Ok(())
            },
        )
    }

    /// Read the current clock source back from the entity
    pub fn request_get_clock_source(&self, notification_id: NotificationId) -> Result<Accepted, StateError> {
        self.controller.send(
            self.entity_id,
            AemCommand::GetClockSource {
                clock_domain_index: self.clock_domain_index,
            },
            notification_id,
        )
    }
}

/// Commands for one AUDIO_UNIT
#[derive(Debug, Clone, Copy)]
pub struct AudioUnitHandle<'a> {
    controller: &'a Controller,
    entity_id: EntityId,
    audio_unit_index: u16,
}

impl AudioUnitHandle<'_> {
    pub fn descriptor(&self) -> Option<AudioUnitDescriptor> {
        self.controller
            .descriptor_tree(self.entity_id)?
            .audio_unit(self.audio_unit_index)
            .cloned()
    }

    /// Change the sampling rate. A rate the unit does not list is rejected
    /// with [`StateError::UnsupportedSamplingRate`] and nothing is sent.
    pub fn request_set_sampling_rate(
        &self,
        notification_id: NotificationId,
        sampling_rate: u32,
    ) -> Result<Accepted, StateError> {
        let entity_id = self.entity_id;
        let audio_unit_index = self.audio_unit_index;
        self.controller.send_checked(
            entity_id,
            Command::Aem(AemCommand::SetSamplingRate {
                audio_unit_index,
                sampling_rate,
            }),
            notification_id,
            |tree| {
                let unit = tree.audio_unit(audio_unit_index).ok_or(StateError::NoSuchDescriptor {
                    entity_id,
                    descriptor_type: DescriptorType::AudioUnit,
                    descriptor_index: audio_unit_index,
                })?;
                if !unit.supports_sampling_rate(sampling_rate) {
                    return Err(StateError::UnsupportedSamplingRate {
                        audio_unit_index,
                        requested: sampling_rate,
                    });
                }
                Ok(())
            },
        )
    }

    pub fn request_get_sampling_rate(&self, notification_id: NotificationId) -> Result<Accepted, StateError> {
        self.controller.send(
            self.entity_id,
            AemCommand::GetSamplingRate {
                audio_unit_index: self.audio_unit_index,
            },
            notification_id,
        )
    }
}

/// Commands for one STREAM_INPUT or STREAM_OUTPUT
#[derive(Debug, Clone, Copy)]
pub struct StreamHandle<'a> {
    controller: &'a Controller,
    entity_id: EntityId,
    descriptor_type: DescriptorType,
    descriptor_index: u16,
}

impl StreamHandle<'_> {
    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        self.controller
            .descriptor_tree(self.entity_id)?
            .stream(self.descriptor_type, self.descriptor_index)
            .cloned()
    }

    /// Change the stream format. A format the stream does not list is
    /// rejected with [`StateError::UnsupportedStreamFormat`] and nothing is
    /// sent.
    pub fn request_set_stream_format(
        &self,
        notification_id: NotificationId,
        stream_format: u64,
    ) -> Result<Accepted, StateError> {
        let entity_id = self.entity_id;
        let descriptor_type = self.descriptor_type;
        let descriptor_index = self.descriptor_index;
        self.controller.send_checked(
            entity_id,
            Command::Aem(AemCommand::SetStreamFormat {
                descriptor_type,
                descriptor_index,
                stream_format,
            }),
            notification_id,
            |tree| {
                let stream = tree
                    .stream(descriptor_type, descriptor_index)
                    .ok_or(StateError::NoSuchDescriptor {
                        entity_id,
                        descriptor_type,
                        descriptor_index,
                    })?;
                if !stream.supports_format(stream_format) {
                    return Err(StateError::UnsupportedStreamFormat {
                        descriptor_type,
                        descriptor_index,
                        requested: stream_format,
                    });
                }
                Ok(())
            },
        )
    }

    pub fn request_get_stream_format(&self, notification_id: NotificationId) -> Result<Accepted, StateError> {
        self.controller.send(
            self.entity_id,
            AemCommand::GetStreamFormat {
                descriptor_type: self.descriptor_type,
                descriptor_index: self.descriptor_index,
            },
            notification_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adp::EntityCapabilities;
    use crate::datalink::EthernetDataLink;

    const CONTROLLER_ID: EntityId = EntityId(0x0200_00ff_fe00_0001);
    const CONTROLLER_MAC: MacAddress = [0x02, 0, 0, 0, 0, 1];
    const E1: EntityId = EntityId(0x0011_22ff_fe33_4455);
    const E1_MAC: MacAddress = [0x02, 0, 0, 0, 0, 0xE1];

    fn controller(auto_enumerate: bool) -> (Controller, UnboundedReceiver<Event>, EthernetDataLink) {
        let link = EthernetDataLink::new(CONTROLLER_MAC);
        let config = ControllerConfig {
            auto_enumerate,
            ..ControllerConfig::new(CONTROLLER_ID, CONTROLLER_MAC)
        };
        let (controller, events) = Controller::new(config, link.clone());
        (controller, events, link)
    }

    fn advertise_e1(controller: &Controller, available_index: u32, now: Instant) {
        let mut entity = LocalEntity::new(EntityInfo::new(E1, 0x1234)).with_available_index(available_index);
        entity.info.valid_time = 5;
        entity.info.entity_capabilities = EntityCapabilities::AEM_SUPPORTED;
        let frame = build_advertisement(&mut entity, AdpMessageType::EntityAvailable, E1_MAC);
        controller.handle_frame_at(&frame.encode(), now);
    }

    fn sent_aem(link: &EthernetDataLink) -> Vec<AemPdu> {
        link.take_transmitted()
            .iter()
            .filter_map(|data| EthernetFrame::decode(data).ok())
            .filter_map(|frame| AemPdu::decode(&frame.payload).ok())
            .collect()
    }

    fn with_clock_domain(controller: &Controller) {
        lock(&controller.state).registry.update_descriptor_tree(E1, |tree| {
            tree.insert(
                0,
                crate::descriptor::Descriptor::ClockDomain(ClockDomainDescriptor::new(0, "", 1, vec![0, 1, 2])),
            )
        });
    }

    #[test]
    fn test_unknown_and_departed_entities_are_rejected() {
        let (controller, _events, link) = controller(false);
        let command = AemCommand::GetClockSource {
            clock_domain_index: 0,
        };
        assert!(matches!(
            controller.send(E1, command.clone(), NotificationId(1)),
            Err(StateError::UnknownEntity(_))
        ));

        let now = Instant::now();
        advertise_e1(&controller, 0, now);
        controller.tick_at(now + Duration::from_secs(11));
        assert!(matches!(
            controller.send(E1, command, NotificationId(1)),
            Err(StateError::EntityNotAvailable(_))
        ));
        assert_eq!(link.transmitted_count(), 0);
    }

    #[test]
    fn test_command_is_addressed_to_the_entity() {
        let (controller, _events, link) = controller(false);
        advertise_e1(&controller, 0, Instant::now());

        let accepted = controller
            .clock_domain(E1, 0)
            .request_get_clock_source(NotificationId(5))
            .unwrap();
        let sent = link.take_transmitted();
        assert_eq!(sent.len(), 1);

        let frame = EthernetFrame::decode(&sent[0]).unwrap();
        assert_eq!(frame.dest_mac, E1_MAC);
        assert_eq!(frame.src_mac, CONTROLLER_MAC);
        let pdu = AemPdu::decode(&frame.payload).unwrap();
        assert_eq!(pdu.target_entity_id, E1);
        assert_eq!(pdu.controller_entity_id, CONTROLLER_ID);
        assert_eq!(pdu.sequence_id, accepted.sequence_id);
        assert_eq!(controller.pending_count(), 1);
    }

    #[test]
    fn test_set_clock_source_validated_locally() {
        let (controller, _events, link) = controller(false);
        advertise_e1(&controller, 0, Instant::now());
        let domain = controller.clock_domain(E1, 0);

        assert!(matches!(
            domain.request_set_clock_source(NotificationId(1), 2),
            Err(StateError::NoSuchDescriptor { .. })
        ));

        with_clock_domain(&controller);
        assert!(matches!(
            domain.request_set_clock_source(NotificationId(1), 3),
            Err(StateError::InvalidClockSource {
                clock_domain_index: 0,
                requested: 3
            })
        ));
        assert_eq!(link.transmitted_count(), 0);
        assert_eq!(controller.pending_count(), 0);
    }

    #[test]
    fn test_in_progress_restarts_timer() {
        let (controller, mut events, link) = controller(false);
        let start = Instant::now();
        advertise_e1(&controller, 0, start);
        with_clock_domain(&controller);

        controller
            .clock_domain(E1, 0)
            .request_set_clock_source(NotificationId(9), 2)
            .unwrap();
        let command = sent_aem(&link).remove(0);

        let in_progress = command.response(AemStatus::InProgress, Vec::new());
        let at = start + Duration::from_millis(200);
        controller.handle_frame_at(&in_progress.to_frame(CONTROLLER_MAC, E1_MAC).encode(), at);

        // Past the original deadline but inside the restarted one
        controller.tick_at(start + Duration::from_millis(300));
        assert!(sent_aem(&link).is_empty());
        assert_eq!(controller.pending_count(), 1);

        let response = command.response(
            AemStatus::Success,
            AemResponse::ClockSource {
                clock_domain_index: 0,
                clock_source_index: 2,
            }
            .encode_payload(),
        );
        controller.handle_frame_at(&response.to_frame(CONTROLLER_MAC, E1_MAC).encode(), at);

        match events.try_recv() {
            Ok(Event::Discovery(DiscoveryEvent::Discovered(id))) => assert_eq!(id, E1),
            other => panic!("unexpected event {:?}", other),
        }
        match events.try_recv() {
            Ok(Event::Notification(n)) => {
                assert_eq!(n.notification_id, NotificationId(9));
                assert!(n.outcome.is_success());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(controller.clock_domain(E1, 0).descriptor().unwrap().clock_source_index(), 2);
    }

    #[test]
    fn test_malformed_success_is_not_delivered() {
        let (controller, mut events, link) = controller(false);
        let start = Instant::now();
        advertise_e1(&controller, 0, start);
        let _ = events.try_recv();

        controller
            .clock_domain(E1, 0)
            .request_get_clock_source(NotificationId(3))
            .unwrap();
        let command = sent_aem(&link).remove(0);
        let truncated = command.response(AemStatus::Success, vec![0, 0x24]);
        controller.handle_frame_at(&truncated.to_frame(CONTROLLER_MAC, E1_MAC).encode(), start);

        assert!(events.try_recv().is_err());
        assert_eq!(controller.pending_count(), 1);
        assert_eq!(controller.statistics().malformed_frames, 1);
    }

    #[test]
    fn test_response_for_another_descriptor_is_not_delivered() {
        let (controller, mut events, link) = controller(false);
        let start = Instant::now();
        advertise_e1(&controller, 0, start);
        with_clock_domain(&controller);
        let _ = events.try_recv();

        controller
            .clock_domain(E1, 0)
            .request_set_clock_source(NotificationId(5), 2)
            .unwrap();
        let command = sent_aem(&link).remove(0);
        let wrong_domain = command.response(
            AemStatus::Success,
            AemResponse::ClockSource {
                clock_domain_index: 1,
                clock_source_index: 2,
            }
            .encode_payload(),
        );
        controller.handle_frame_at(&wrong_domain.to_frame(CONTROLLER_MAC, E1_MAC).encode(), start);

        assert!(events.try_recv().is_err());
        assert_eq!(controller.pending_count(), 1);
        assert_eq!(controller.statistics().malformed_frames, 1);
        assert_eq!(controller.clock_domain(E1, 0).descriptor().unwrap().clock_source_index(), 1);

        // The command is still retried and times out as usual
        controller.tick_at(start + Duration::from_millis(250));
        assert_eq!(sent_aem(&link).len(), 1);
        controller.tick_at(start + Duration::from_millis(500));
        assert!(matches!(
            events.try_recv(),
            Ok(Event::Notification(Notification {
                outcome: CommandOutcome::TimedOut(_),
                ..
            }))
        ));
    }

    #[test]
    fn test_send_fails_when_sequence_ids_run_out() {
        let (controller, _events, _link) = controller(false);
        let now = Instant::now();
        advertise_e1(&controller, 0, now);
        {
            let mut state = lock(&controller.state);
            for _ in 0..=u16::MAX {
                let sequence_id = state.pending.next_sequence_id(E1).unwrap();
                state.pending.insert(PendingCommand::new(
                    E1,
                    sequence_id,
                    Command::Aem(AemCommand::ControllerAvailable),
                    CommandOrigin::Enumeration,
                    Vec::new(),
                    constants::AECP_COMMAND_TIMEOUT,
                    now,
                ));
            }
        }

        let result = controller
            .clock_domain(E1, 0)
            .request_get_clock_source(NotificationId(1));
        assert!(matches!(result, Err(StateError::SequenceIdsExhausted(id)) if id == E1));
        assert_eq!(controller.pending_count(), 65536);
    }

    #[test]
    fn test_responses_for_other_controllers_are_ignored() {
        let (controller, mut events, link) = controller(false);
        let start = Instant::now();
        advertise_e1(&controller, 0, start);
        let _ = events.try_recv();

        controller
            .clock_domain(E1, 0)
            .request_get_clock_source(NotificationId(3))
            .unwrap();
        let command = sent_aem(&link).remove(0);
        let mut response = command.response(AemStatus::Success, vec![0, 0x24, 0, 0, 0, 1, 0, 0]);
        response.controller_entity_id = EntityId(0x99);
        controller.handle_frame_at(&response.to_frame(CONTROLLER_MAC, E1_MAC).encode(), start);

        assert!(events.try_recv().is_err());
        assert_eq!(controller.pending_count(), 1);
    }

    #[test]
    fn test_cancel_suppresses_notification() {
        let (controller, mut events, link) = controller(false);
        let start = Instant::now();
        advertise_e1(&controller, 0, start);
        let _ = events.try_recv();

        controller
            .clock_domain(E1, 0)
            .request_get_clock_source(NotificationId(4))
            .unwrap();
        let command = sent_aem(&link).remove(0);
        assert!(controller.cancel(NotificationId(4)));
        assert!(!controller.cancel(NotificationId(4)));

        let response = command.response(AemStatus::Success, vec![0, 0x24, 0, 0, 0, 1, 0, 0]);
        controller.handle_frame_at(&response.to_frame(CONTROLLER_MAC, E1_MAC).encode(), start);
        controller.tick_at(start + Duration::from_secs(2));

        assert!(events.try_recv().is_err());
        assert_eq!(controller.statistics().unmatched_responses, 1);
    }

    #[test]
    fn test_duplicate_notification_id() {
        let (controller, _events, _link) = controller(false);
        advertise_e1(&controller, 0, Instant::now());

        controller
            .clock_domain(E1, 0)
            .request_get_clock_source(NotificationId(1))
            .unwrap();
        assert!(matches!(
            controller.audio_unit(E1, 0).request_get_sampling_rate(NotificationId(1)),
            Err(StateError::DuplicateNotificationId(NotificationId(1)))
        ));
    }

    #[test]
    fn test_own_advertisement_and_discover() {
        let link = EthernetDataLink::new(CONTROLLER_MAC);
        let config = ControllerConfig {
            advertise_interval: Some(Duration::from_secs(5)),
            ..ControllerConfig::new(CONTROLLER_ID, CONTROLLER_MAC)
        };
        let (controller, mut events) = Controller::new(config, link.clone());

        let now = Instant::now();
        controller.tick_at(now);
        let sent = link.take_transmitted();
        assert_eq!(sent.len(), 1);

        // Our own advertisement coming back is not an entity
        controller.handle_frame_at(&sent[0], now);
        assert!(controller.entity_ids().is_empty());
        assert!(events.try_recv().is_err());

        // Not due again yet
        controller.tick_at(now + Duration::from_secs(1));
        assert_eq!(link.transmitted_count(), 0);

        // ENTITY_DISCOVER is answered
        controller.handle_frame_at(&build_discover(EntityId::NULL, E1_MAC).encode(), now);
        let answer = link.take_transmitted();
        assert_eq!(answer.len(), 1);
        let adpdu = parse_adpdu(&EthernetFrame::decode(&answer[0]).unwrap()).unwrap();
        assert_eq!(adpdu.entity_id(), CONTROLLER_ID);
        assert_eq!(adpdu.message_type(), AdpMessageType::EntityAvailable);

        controller.shutdown_advertisement().unwrap();
        let departing = link.take_transmitted();
        let adpdu = parse_adpdu(&EthernetFrame::decode(&departing[0]).unwrap()).unwrap();
        assert_eq!(adpdu.message_type(), AdpMessageType::EntityDeparting);

        // Silent after departing, even when discovered
        controller.tick_at(now + Duration::from_secs(60));
        controller.handle_frame_at(&build_discover(EntityId::NULL, E1_MAC).encode(), now);
        assert_eq!(link.transmitted_count(), 0);
    }

    #[test]
    fn test_local_entity_change_bumps_available_index() {
        let (controller, _events, link) = controller(false);
        controller.advertise().unwrap();
        controller.update_local_entity(|info| info.association_id = 0x77);
        controller.advertise().unwrap();

        let indexes: Vec<u32> = link
            .take_transmitted()
            .iter()
            .map(|data| parse_adpdu(&EthernetFrame::decode(data).unwrap()).unwrap().available_index())
            .collect();
        assert_eq!(indexes, vec![0, 1]);
    }
}
