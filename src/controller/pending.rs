//! Pending command table
//!
//! Every command on the wire has one entry here, keyed by target entity and
//! sequence id, until a response resolves it, the retry ceiling is reached or
//! the caller cancels it. Sequence ids are allocated per target entity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::descriptor::DescriptorType;
use crate::pdu::EntityId;

use super::{Command, CommandKind, NotificationId};

/// Who is waiting for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandOrigin {
    /// A caller, told through a notification
    Caller(NotificationId),
    /// The controller's own descriptor enumeration
    Enumeration,
}

/// A command waiting for its response
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub entity_id: EntityId,
    pub sequence_id: u16,
    pub command: Command,
    pub origin: CommandOrigin,
    /// Encoded Ethernet frame, retransmitted unchanged
    pub frame: Vec<u8>,
    pub issued: Instant,
    pub deadline: Instant,
    pub timeout: Duration,
    pub retries: u32,
}

impl PendingCommand {
    pub fn new(
        entity_id: EntityId,
        sequence_id: u16,
        command: Command,
        origin: CommandOrigin,
        frame: Vec<u8>,
        timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            entity_id,
            sequence_id,
            command,
            origin,
            frame,
            issued: now,
            deadline: now + timeout,
            timeout,
            retries: 0,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    pub fn notification_id(&self) -> Option<NotificationId> {
        match self.origin {
            CommandOrigin::Caller(id) => Some(id),
            CommandOrigin::Enumeration => None,
        }
    }
}

/// Outcome of a timer pass over the table
#[derive(Debug, Default)]
pub struct TimerResult {
    /// `(entity, sequence id, frame)` to send again
    pub retransmit: Vec<(EntityId, u16, Vec<u8>)>,
    /// Entries that used up their retries, removed from the table
    pub expired: Vec<PendingCommand>,
}

#[derive(Debug, Default)]
pub struct PendingCommandTable {
    entries: HashMap<(EntityId, u16), PendingCommand>,
    next_sequence: HashMap<EntityId, u16>,
}

impl PendingCommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence id for `entity_id`, skipping ids still in
    /// use after a wrap. `None` when all 65536 ids are pending.
    pub fn next_sequence_id(&mut self, entity_id: EntityId) -> Option<u16> {
        let next = self.next_sequence.entry(entity_id).or_insert(0);
        let start = *next;
        let sequence_id = (0..=u16::MAX)
            .map(|offset| start.wrapping_add(offset))
            .find(|seq| !self.entries.contains_key(&(entity_id, *seq)))?;
        *next = sequence_id.wrapping_add(1);
        Some(sequence_id)
    }

    pub fn insert(&mut self, pending: PendingCommand) {
        self.entries
            .insert((pending.entity_id, pending.sequence_id), pending);
    }

    /// A pending command of the same kind against the same descriptor
    pub fn find_duplicate(
        &self,
        entity_id: EntityId,
        kind: CommandKind,
        target: Option<(DescriptorType, u16)>,
    ) -> Option<&PendingCommand> {
        self.entries.values().find(|p| {
            p.entity_id == entity_id && p.kind() == kind && p.command.target() == target
        })
    }

    pub fn contains_notification(&self, notification_id: NotificationId) -> bool {
        self.entries
            .values()
            .any(|p| p.origin == CommandOrigin::Caller(notification_id))
    }

    pub fn get(&self, entity_id: EntityId, sequence_id: u16) -> Option<&PendingCommand> {
        self.entries.get(&(entity_id, sequence_id))
    }

    /// Remove the entry if it is a command of `kind`
    pub fn take(&mut self, entity_id: EntityId, sequence_id: u16, kind: CommandKind) -> Option<PendingCommand> {
        match self.entries.get(&(entity_id, sequence_id)) {
            Some(pending) if pending.kind() == kind => self.entries.remove(&(entity_id, sequence_id)),
            _ => None,
        }
    }

    /// Push the deadline out by a full timeout without using a retry
    pub fn restart_timer(&mut self, entity_id: EntityId, sequence_id: u16, kind: CommandKind, now: Instant) -> bool {
        match self.entries.get_mut(&(entity_id, sequence_id)) {
            Some(pending) if pending.kind() == kind => {
                pending.deadline = now + pending.timeout;
                true
            }
            _ => false,
        }
    }

    /// Remove the caller command tagged `notification_id`
    pub fn cancel(&mut self, notification_id: NotificationId) -> Option<PendingCommand> {
        let key = self
            .entries
            .iter()
            .find(|(_, p)| p.origin == CommandOrigin::Caller(notification_id))
            .map(|(key, _)| *key)?;
        self.entries.remove(&key)
    }

    /// Drop enumeration reads to `entity_id`. Returns how many were dropped.
    pub fn remove_enumeration(&mut self, entity_id: EntityId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, p| !(p.entity_id == entity_id && p.origin == CommandOrigin::Enumeration));
        before - self.entries.len()
    }

    /// Retry or expire every entry whose deadline has passed at `now`
    pub fn check_timeouts(&mut self, now: Instant, max_retries: u32) -> TimerResult {
        let mut result = TimerResult::default();

        let overdue: Vec<(EntityId, u16)> = self
            .entries
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(key, _)| *key)
            .collect();

        for key in overdue {
            let Some(pending) = self.entries.get_mut(&key) else {
                continue;
            };
            if pending.retries < max_retries {
                pending.retries += 1;
                pending.deadline = now + pending.timeout;
                result
                    .retransmit
                    .push((pending.entity_id, pending.sequence_id, pending.frame.clone()));
            } else if let Some(pending) = self.entries.remove(&key) {
                result.expired.push(pending);
            }
        }

        result.retransmit.sort_by_key(|(entity, seq, _)| (*entity, *seq));
        result
            .expired
            .sort_by_key(|p| (p.entity_id, p.sequence_id));
        result
    }

    /// Earliest deadline in the table
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|p| p.deadline).min()
    }

    /// Time until `entity_id`/`sequence_id` times out, zero if overdue
    pub fn remaining_time(&self, entity_id: EntityId, sequence_id: u16, now: Instant) -> Option<Duration> {
        self.get(entity_id, sequence_id)
            .map(|p| p.deadline.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
