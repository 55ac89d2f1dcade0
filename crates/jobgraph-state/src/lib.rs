//! # Resource state table
//!
//! Every GPU resource that takes part in job compilation reserves exactly one [StateSlot] for its whole lifetime.
//! Independent consumers (a job compiler, a backend's last-known-state cache, ...) each create their own [Domain]. A domain
//! is a private view over all slots, so two consumers can track per-resource state at the same time without interfering.
//!
//! Stored values are plain `usize`s. `0` is reserved and reads back as "nothing stored", which is also the value every
//! slot starts with in every domain.
//!
//! The table is not thread-safe on its own. Callers that share it across threads have to wrap it in a lock.

use std::fmt::Display;

use slotmap::SlotMap;
use thiserror::Error;

slotmap::new_key_type!(
    ///One isolated view over all state slots of a [ResourceStateTable].
    pub struct Domain;
);

///Index of one resource's state in every [Domain] of a table. Allocated once per resource lifetime, and
/// recycled after the resource released it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateSlot(u32);

impl StateSlot {
    ///Dense index of this slot.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for StateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateTableError {
    #[error("Domain {0:?} does not exist (anymore?)")]
    NoSuchDomain(Domain),
    #[error("State slot {slot} is out of range, table only has {count} slots")]
    SlotOutOfRange { slot: StateSlot, count: usize },
    #[error("State slot {0} was released and is not live")]
    SlotNotLive(StateSlot),
}

struct DomainStorage {
    //one value per slot, index is the slot's index
    states: Vec<usize>,
}

impl DomainStorage {
    fn sized(slot_count: usize) -> Self {
        DomainStorage {
            states: vec![ResourceStateTable::NO_STATE; slot_count],
        }
    }

    //grows lazily if the domain is older than the slot
    fn get(&self, slot: StateSlot) -> usize {
        self.states
            .get(slot.index())
            .copied()
            .unwrap_or(ResourceStateTable::NO_STATE)
    }

    fn set(&mut self, slot: StateSlot, value: usize) {
        if self.states.len() <= slot.index() {
            self.states
                .resize(slot.index() + 1, ResourceStateTable::NO_STATE);
        }
        self.states[slot.index()] = value;
    }
}

///Two-dimensional `(domain, slot) -> usize` store. See the module level documentation.
pub struct ResourceStateTable {
    domains: SlotMap<Domain, DomainStorage>,
    //liveness of every slot ever allocated
    live: Vec<bool>,
    free_slots: Vec<StateSlot>,
}

impl Default for ResourceStateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStateTable {
    ///Reserved value that marks "nothing stored".
    pub const NO_STATE: usize = 0;

    pub fn new() -> Self {
        ResourceStateTable {
            domains: SlotMap::with_key(),
            live: Vec::new(),
            free_slots: Vec::new(),
        }
    }

    ///Number of slots ever allocated, including released ones.
    pub fn slot_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_slot_count(&self) -> usize {
        self.live.len() - self.free_slots.len()
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn contains_domain(&self, domain: Domain) -> bool {
        self.domains.contains_key(domain)
    }

    ///Creates a new domain. All live slots read back as "nothing stored" within it.
    pub fn create_domain(&mut self) -> Domain {
        let domain = self.domains.insert(DomainStorage::sized(self.live.len()));
        #[cfg(feature = "logging")]
        log::trace!("Created state domain {:?}", domain);
        domain
    }

    ///Removes `domain` and all values stored in it. The key is never handed out again.
    pub fn remove_domain(&mut self, domain: Domain) -> Result<(), StateTableError> {
        self.domains
            .remove(domain)
            .map(|_| {
                #[cfg(feature = "logging")]
                log::trace!("Removed state domain {:?}", domain);
            })
            .ok_or(StateTableError::NoSuchDomain(domain))
    }

    ///Resets every value of `domain` to "nothing stored".
    pub fn clear_domain(&mut self, domain: Domain) -> Result<(), StateTableError> {
        let storage = self
            .domains
            .get_mut(domain)
            .ok_or(StateTableError::NoSuchDomain(domain))?;
        storage
            .states
            .iter_mut()
            .for_each(|v| *v = Self::NO_STATE);
        Ok(())
    }

    ///Allocates a slot for a new resource. Prefers recycling a released slot. The returned slot reads back as
    /// "nothing stored" in every domain, regardless of what its previous owner stored.
    pub fn create_state_slot(&mut self) -> StateSlot {
        if let Some(slot) = self.free_slots.pop() {
            self.live[slot.index()] = true;
            return slot;
        }

        let slot = StateSlot(self.live.len() as u32);
        self.live.push(true);
        for storage in self.domains.values_mut() {
            storage.set(slot, Self::NO_STATE);
        }
        slot
    }

    ///Releases `slot`. Clears it in every domain and queues it for reuse.
    pub fn remove_state_slot(&mut self, slot: StateSlot) -> Result<(), StateTableError> {
        self.check_slot(slot)?;
        for storage in self.domains.values_mut() {
            if storage.states.len() > slot.index() {
                storage.states[slot.index()] = Self::NO_STATE;
            }
        }
        self.live[slot.index()] = false;
        self.free_slots.push(slot);
        Ok(())
    }

    pub fn is_live(&self, slot: StateSlot) -> bool {
        self.live.get(slot.index()).copied().unwrap_or(false)
    }

    ///Stores `value` for `slot` in `domain`. Storing [Self::NO_STATE] is the same as [Self::clear_state].
    pub fn store_state(
        &mut self,
        domain: Domain,
        slot: StateSlot,
        value: usize,
    ) -> Result<(), StateTableError> {
        self.check_slot(slot)?;
        let storage = self
            .domains
            .get_mut(domain)
            .ok_or(StateTableError::NoSuchDomain(domain))?;
        storage.set(slot, value);
        Ok(())
    }

    ///Reads the value of `slot` in `domain`. Returns `None` if nothing was stored since the slot was allocated.
    pub fn get_state(&self, domain: Domain, slot: StateSlot) -> Result<Option<usize>, StateTableError> {
        self.check_slot(slot)?;
        let storage = self
            .domains
            .get(domain)
            .ok_or(StateTableError::NoSuchDomain(domain))?;

        match storage.get(slot) {
            Self::NO_STATE => Ok(None),
            value => Ok(Some(value)),
        }
    }

    pub fn clear_state(&mut self, domain: Domain, slot: StateSlot) -> Result<(), StateTableError> {
        self.store_state(domain, slot, Self::NO_STATE)
    }

    fn check_slot(&self, slot: StateSlot) -> Result<(), StateTableError> {
        match self.live.get(slot.index()) {
            None => Err(StateTableError::SlotOutOfRange {
                slot,
                count: self.live.len(),
            }),
            Some(false) => Err(StateTableError::SlotNotLive(slot)),
            Some(true) => Ok(()),
        }
    }
}
