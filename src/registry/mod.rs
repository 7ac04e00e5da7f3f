//! Entity Registry
//!
//! The registry holds one [`EntityRecord`] per remote entity seen on the
//! network: its presence state, the last ADPDU it sent, and the descriptor
//! tree read from it. It has no locking of its own; the controller owns it
//! behind its state mutex.
//!
//! Descriptor trees are published as `Arc<DescriptorTree>`. A reader that took
//! a tree keeps a consistent snapshot: [`EntityRegistry::update_descriptor_tree`]
//! copies the tree if anyone still holds it, and
//! [`EntityRegistry::replace_descriptor_tree`] swaps in a new one wholesale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::adp::{Adpdu, AdvertisementOutcome, Liveness, LivenessState};
use crate::datalink::MacAddress;
use crate::descriptor::DescriptorTree;
use crate::pdu::EntityId;

/// A presence change worth telling the application about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered(EntityId),
    /// The entity bumped its available_index
    Updated(EntityId),
    /// The entity rebooted or changed model; its descriptor tree was dropped
    Restarted(EntityId),
    /// A departed entity is back
    Reconnected(EntityId),
    Departed(EntityId),
}

impl DiscoveryEvent {
    pub fn entity_id(&self) -> EntityId {
        match *self {
            DiscoveryEvent::Discovered(id)
            | DiscoveryEvent::Updated(id)
            | DiscoveryEvent::Restarted(id)
            | DiscoveryEvent::Reconnected(id)
            | DiscoveryEvent::Departed(id) => id,
        }
    }
}

/// Everything known about one remote entity
#[derive(Debug, Clone)]
pub struct EntityRecord {
    liveness: Liveness,
    adpdu: Adpdu,
    descriptors: Arc<DescriptorTree>,
}

impl EntityRecord {
    fn new(adpdu: Adpdu) -> Self {
        Self {
            liveness: Liveness::new(),
            adpdu,
            descriptors: Arc::new(DescriptorTree::new()),
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.adpdu.entity_id()
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn state(&self) -> LivenessState {
        self.liveness.state()
    }

    pub fn is_available(&self) -> bool {
        self.liveness.is_available()
    }

    /// The last ENTITY_AVAILABLE received
    pub fn adpdu(&self) -> &Adpdu {
        &self.adpdu
    }

    /// MAC address AECP commands are sent to
    pub fn source_mac(&self) -> MacAddress {
        self.adpdu.source_mac()
    }

    pub fn available_index(&self) -> u32 {
        self.liveness.available_index()
    }

    pub fn descriptors(&self) -> Arc<DescriptorTree> {
        Arc::clone(&self.descriptors)
    }
}

/// Registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStatistics {
    /// Records currently held, departed ones included
    pub tracked: usize,
    pub available: usize,
    pub departed: usize,
    pub discovered_total: u64,
    pub departed_total: u64,
    pub restarts: u64,
    pub ignored_advertisements: u64,
}

/// Remote entities keyed by entity id
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, EntityRecord>,
    discovered_total: u64,
    departed_total: u64,
    restarts: u64,
    ignored_advertisements: u64,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ENTITY_AVAILABLE.
    ///
    /// Advertisements with a null entity id, or from entities asking
    /// controllers to ignore them, are dropped. A restart (available_index
    /// going backwards or a new entity model) replaces the descriptor tree
    /// with an empty one. Returns `None` for a plain refresh.
    pub fn observe_advertisement(&mut self, adpdu: Adpdu, now: Instant) -> Option<DiscoveryEvent> {
        let entity_id = adpdu.entity_id();
        if entity_id.is_null() {
            debug!("Ignoring ENTITY_AVAILABLE with null entity id");
            self.ignored_advertisements += 1;
            return None;
        }
        if adpdu.is_ignored() {
            debug!(
                "Ignoring entity {} (capabilities {:?})",
                entity_id,
                adpdu.entity_capabilities()
            );
            self.ignored_advertisements += 1;
            return None;
        }

        let record = self
            .entities
            .entry(entity_id)
            .or_insert_with(|| EntityRecord::new(adpdu.clone()));
        let outcome = record.liveness.on_available(&adpdu, now);
        record.adpdu = adpdu;

        match outcome {
            AdvertisementOutcome::Discovered => {
                info!(
                    "Discovered entity {} (model 0x{:016x}, available_index {})",
                    entity_id,
                    record.adpdu.entity_model_id(),
                    record.available_index()
                );
                self.discovered_total += 1;
                Some(DiscoveryEvent::Discovered(entity_id))
            }
            AdvertisementOutcome::Refreshed => None,
            AdvertisementOutcome::Updated => {
                debug!(
                    "Entity {} available_index now {}",
                    entity_id,
                    record.available_index()
                );
                Some(DiscoveryEvent::Updated(entity_id))
            }
            AdvertisementOutcome::Restarted => {
                warn!(
                    "Entity {} restarted (available_index {}), dropping its descriptors",
                    entity_id,
                    record.available_index()
                );
                record.descriptors = Arc::new(DescriptorTree::new());
                self.restarts += 1;
                Some(DiscoveryEvent::Restarted(entity_id))
            }
            AdvertisementOutcome::Reconnected => {
                info!("Entity {} is available again", entity_id);
                Some(DiscoveryEvent::Reconnected(entity_id))
            }
        }
    }

    /// Record an ENTITY_DEPARTING
    pub fn observe_departing(&mut self, entity_id: EntityId) -> Option<DiscoveryEvent> {
        let record = self.entities.get_mut(&entity_id)?;
        if record.liveness.on_departing() {
            info!("Entity {} departed", entity_id);
            self.departed_total += 1;
            Some(DiscoveryEvent::Departed(entity_id))
        } else {
            None
        }
    }

    /// Expire entities whose valid time has elapsed. Each entity is reported
    /// once per departure.
    pub fn sweep(&mut self, now: Instant) -> Vec<EntityId> {
        let mut departed: Vec<EntityId> = self
            .entities
            .iter_mut()
            .filter_map(|(id, record)| record.liveness.expire(now).then_some(*id))
            .collect();
        departed.sort();

        for entity_id in &departed {
            info!("Entity {} timed out", entity_id);
        }
        self.departed_total += departed.len() as u64;
        departed
    }

    /// Drop departed records. Returns how many were removed.
    pub fn purge_departed(&mut self) -> usize {
        let before = self.entities.len();
        self.entities
            .retain(|_, record| record.state() != LivenessState::Departed);
        before - self.entities.len()
    }

    pub fn get(&self, entity_id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&entity_id)
    }

    pub fn contains(&self, entity_id: EntityId) -> bool {
        self.entities.contains_key(&entity_id)
    }

    pub fn is_available(&self, entity_id: EntityId) -> bool {
        self.get(entity_id).is_some_and(EntityRecord::is_available)
    }

    /// Every tracked entity id, in ascending order
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn available_entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, record)| record.is_available())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn descriptor_tree(&self, entity_id: EntityId) -> Option<Arc<DescriptorTree>> {
        self.get(entity_id).map(EntityRecord::descriptors)
    }

    /// Publish a new descriptor tree. Returns false for an unknown entity.
    pub fn replace_descriptor_tree(&mut self, entity_id: EntityId, tree: DescriptorTree) -> bool {
        match self.entities.get_mut(&entity_id) {
            Some(record) => {
                record.descriptors = Arc::new(tree);
                true
            }
            None => false,
        }
    }

    /// Modify an entity's descriptor tree copy-on-write. Snapshots taken
    /// earlier are not affected.
    pub fn update_descriptor_tree<R>(
        &mut self,
        entity_id: EntityId,
        update: impl FnOnce(&mut DescriptorTree) -> R,
    ) -> Option<R> {
        let record = self.entities.get_mut(&entity_id)?;
        Some(update(Arc::make_mut(&mut record.descriptors)))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let available = self.entities.values().filter(|r| r.is_available()).count();
        let departed = self
            .entities
            .values()
            .filter(|r| r.state() == LivenessState::Departed)
            .count();
        RegistryStatistics {
            tracked: self.entities.len(),
            available,
            departed,
            discovered_total: self.discovered_total,
            departed_total: self.departed_total,
            restarts: self.restarts,
            ignored_advertisements: self.ignored_advertisements,
        }
    }
}
