use tracing::debug;

use crate::entity::{Entity, EntityType};
use crate::error::BulkResult;
use crate::key::{Key, PrimaryKey};

use super::store::{MemoryDatabase, table_name, to_row};

/// Pending changes to one entity's table.
///
/// Nothing is written until [`ChangeSet::save_changes`], which applies the
/// whole set under one lock or none of it.
pub struct ChangeSet<'db, E: Entity> {
    db: &'db MemoryDatabase,
    entity_type: EntityType,
    key: PrimaryKey,
    added: Vec<E>,
    updated: Vec<E>,
    removed: Vec<Key>,
}

/// What a saved change set did.
#[derive(Debug)]
pub struct SavedChanges<E> {
    /// Added records, with generated keys filled in, in the order queued.
    pub added: Vec<E>,
    /// Updates that found their row.
    pub updated: u64,
    /// Removals that found their row.
    pub removed: u64,
}

impl<E> SavedChanges<E> {
    /// Total rows written.
    pub fn rows_affected(&self) -> u64 {
        self.added.len() as u64 + self.updated + self.removed
    }
}

impl<'db, E: Entity> ChangeSet<'db, E> {
    /// Start tracking changes against `db`.
    pub fn new(db: &'db MemoryDatabase) -> BulkResult<Self> {
        let entity_type = E::entity_type();
        let key = PrimaryKey::from_entity_type(&entity_type)?;
        Ok(Self {
            db,
            entity_type,
            key,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        })
    }

    /// The key descriptor of `E`.
    pub fn key(&self) -> &PrimaryKey {
        &self.key
    }

    /// Queue an insert.
    pub fn add(&mut self, record: E) {
        self.added.push(record);
    }

    /// Queue a full-row update; the record's key picks the row.
    pub fn update(&mut self, record: E) {
        self.updated.push(record);
    }

    /// Queue a removal.
    pub fn remove(&mut self, key: Key) {
        self.removed.push(key);
    }

    /// Number of queued changes.
    pub fn pending(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    /// Apply removals, then updates, then inserts.
    ///
    /// Generated key parts left unset on added records are assigned here.
    pub fn save_changes(self) -> BulkResult<SavedChanges<E>> {
        let Self {
            db,
            entity_type,
            key: pk,
            mut added,
            updated,
            removed,
        } = self;

        let updates = updated
            .iter()
            .map(|r| Ok((pk.key_of(r)?, to_row(r, &entity_type)?)))
            .collect::<BulkResult<Vec<_>>>()?;

        let saved = db.write(&table_name(&entity_type), |table| -> BulkResult<SavedChanges<E>> {
            let mut staged = table.clone();

            let removed = removed
                .iter()
                .filter(|key| staged.remove(key).is_some())
                .count() as u64;

            let mut updated = 0u64;
            for (key, row) in updates {
                if staged.replace(&key, row) {
                    updated += 1;
                }
            }

            for record in &added {
                for part in pk.parts().iter().filter(|p| p.generated) {
                    if let Some(value) = record.get_value(&part.property) {
                        if !part.is_unset(&value) {
                            staged.observe_identity(&part.property, &value);
                        }
                    }
                }
            }

            for record in added.iter_mut() {
                for part in pk.parts().iter().filter(|p| p.generated) {
                    let current = record.get_value(&part.property);
                    if current.as_ref().is_none_or(|v| part.is_unset(v)) {
                        let value = staged.next_value(&part.property, &part.sql_type)?;
                        record.set_value(&part.property, value)?;
                    }
                }
                staged.insert(&entity_type.name, pk.key_of(record)?, to_row(record, &entity_type)?)?;
            }

            *table = staged;
            Ok(SavedChanges {
                added: Vec::new(),
                updated,
                removed,
            })
        })?;

        debug!(
            entity = %entity_type.name,
            added = added.len(),
            updated = saved.updated,
            removed = saved.removed,
            "saved memory changes"
        );
        Ok(SavedChanges { added, ..saved })
    }
}
