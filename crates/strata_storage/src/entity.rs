//! Entity location table.
//!
//! The `EntityLocationTable` is the only place that maps an [`Entity`] to the
//! archetype and row that currently hold its data. Every insert, move between
//! archetypes, swap-remove, and snapshot load goes through it.

use strata_foundation::{Entity, Error, Result};

use crate::archetype::ArchetypeId;

/// Physical position of an entity's row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    /// Archetype holding the row.
    pub archetype: ArchetypeId,
    /// Row index inside the archetype. Not stable across deletes.
    pub row: usize,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub const fn new(archetype: ArchetypeId, row: usize) -> Self {
        Self { archetype, row }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Free,
    Live(Location),
}

/// Maps entities to their current location and recycles freed identifiers.
///
/// Identifiers are allocated from a free list when available, otherwise a new
/// slot is appended. The free list is a stack, so the most recently deleted
/// identifier is handed out first.
#[derive(Debug, Clone, Default)]
pub struct EntityLocationTable {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live_count: usize,
}

impl EntityLocationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an identifier for a row at `location`.
    ///
    /// # Errors
    ///
    /// Returns a precondition error once every 32-bit identifier is live.
    pub fn create(&mut self, location: Location) -> Result<Entity> {
        let index = match self.free_list.pop() {
            Some(index) => {
                self.slots[index as usize] = Slot::Live(location);
                index
            }
            None => {
                let index = slot_index(self.slots.len())?;
                self.slots.push(Slot::Live(location));
                index
            }
        };
        self.live_count += 1;
        Ok(Entity::new(index))
    }

    /// Re-materializes a specific identifier at `location`.
    ///
    /// Used when an undo or redo log replays an insert, so that the entity
    /// comes back under the exact identifier it had before. Growing the table
    /// to reach `entity` pushes the skipped identifiers onto the free list.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if `entity` is already live.
    pub fn claim(&mut self, entity: Entity, location: Location) -> Result<()> {
        let slot = entity.slot();
        if slot < self.slots.len() {
            if let Slot::Live(_) = self.slots[slot] {
                return Err(Error::precondition(format!(
                    "cannot claim {entity}: identifier is already live"
                )));
            }
            if let Some(pos) = self.free_list.iter().rposition(|&i| i == entity.index()) {
                self.free_list.remove(pos);
            }
        } else {
            while self.slots.len() < slot {
                let skipped = slot_index(self.slots.len())?;
                self.slots.push(Slot::Free);
                self.free_list.push(skipped);
            }
            self.slots.push(Slot::Free);
        }

        self.slots[slot] = Slot::Live(location);
        self.live_count += 1;
        Ok(())
    }

    /// Records that a live entity's row moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live.
    pub fn relocate(&mut self, entity: Entity, location: Location) -> Result<()> {
        match self.slots.get_mut(entity.slot()) {
            Some(slot @ Slot::Live(_)) => {
                *slot = Slot::Live(location);
                Ok(())
            }
            _ => Err(Error::entity_not_found(entity)),
        }
    }

    /// Frees an entity's identifier and returns its last location.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not live.
    pub fn delete(&mut self, entity: Entity) -> Result<Location> {
        let location = self
            .locate(entity)
            .ok_or_else(|| Error::entity_not_found(entity))?;
        self.slots[entity.slot()] = Slot::Free;
        self.free_list.push(entity.index());
        self.live_count -= 1;
        Ok(location)
    }

    /// Returns the current location of a live entity.
    #[must_use]
    pub fn locate(&self, entity: Entity) -> Option<Location> {
        match self.slots.get(entity.slot()) {
            Some(Slot::Live(location)) => Some(*location),
            _ => None,
        }
    }

    /// Checks if an entity is live.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.locate(entity).is_some()
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Returns true if there are no live entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Iterates over live entities in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Location)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Live(location) => {
                    let index = u32::try_from(index).ok()?;
                    Some((Entity::new(index), *location))
                }
                Slot::Free => None,
            })
    }

    /// Returns the free list, bottom of the stack first.
    #[must_use]
    pub fn free_list(&self) -> Vec<Entity> {
        self.free_list.iter().map(|&i| Entity::new(i)).collect()
    }

    /// Replaces the free list, for snapshot restore.
    ///
    /// Slots are grown as needed so that every listed identifier exists.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if a listed identifier is live.
    pub fn restore_free_list(&mut self, free: &[Entity]) -> Result<()> {
        for entity in free {
            if self.contains(*entity) {
                return Err(Error::precondition(format!(
                    "free list names live identifier {entity}"
                )));
            }
            while self.slots.len() <= entity.slot() {
                self.slots.push(Slot::Free);
            }
        }
        let listed: Vec<u32> = free.iter().map(|e| e.index()).collect();
        // Unlisted free slots keep their relative order beneath the listed ones.
        let mut rebuilt: Vec<u32> = self
            .iter_free()
            .filter(|index| !listed.contains(index))
            .collect();
        rebuilt.extend(listed);
        self.free_list = rebuilt;
        Ok(())
    }

    /// Drops trailing free slots and forgets them from the free list.
    ///
    /// Live identifiers never change.
    pub fn compact(&mut self) {
        while matches!(self.slots.last(), Some(Slot::Free)) {
            self.slots.pop();
        }
        let len = self.slots.len();
        self.free_list.retain(|&index| (index as usize) < len);
    }

    /// Removes every entity.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.live_count = 0;
    }

    /// Returns the number of slots, live or free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn iter_free(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot, Slot::Free))
            .filter_map(|(index, _)| u32::try_from(index).ok())
    }
}

fn slot_index(slot: usize) -> Result<u32> {
    u32::try_from(slot)
        .map_err(|_| Error::precondition(format!("entity identifiers exhausted at slot {slot}")))
}
