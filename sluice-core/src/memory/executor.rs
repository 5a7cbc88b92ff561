use std::collections::HashSet;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::debug;

use crate::config::BulkConfig;
use crate::connection::{BulkConnection, ensure_open};
use crate::correlate::BulkOutcome;
use crate::dialect::Dialect;
use crate::entity::{Entity, EntityType};
use crate::error::{BulkError, BulkResult};
use crate::executor::{BulkExecutor, MergeOptions, NotMatchedBehavior, merge_update_properties};
use crate::key::{Key, PrimaryKey};
use crate::mapping::validate_assignable;
use crate::query::Query;

use super::changes::ChangeSet;
use super::predicates::KeyPredicate;
use super::store::MemoryDatabase;

/// Bulk executor for in-memory connections.
///
/// Operations materialize the rows the query selects and apply the change
/// through a [`ChangeSet`], so each call writes all of its changes or none.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    config: BulkConfig,
}

impl MemoryExecutor {
    /// Create an in-memory executor.
    pub fn new(config: BulkConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &BulkConfig {
        &self.config
    }
}

async fn database(conn: &mut dyn BulkConnection) -> BulkResult<MemoryDatabase> {
    ensure_open(conn).await?;
    let provider = conn.provider_name().to_string();
    conn.as_memory()
        .map(|memory| memory.database().clone())
        .ok_or_else(|| {
            BulkError::unsupported_provider(provider)
                .with_suggestion("The in-memory executor needs a MemoryConnection")
        })
}

fn copy_properties<E: Entity>(source: &E, target: &mut E, properties: &[&str]) -> BulkResult<()> {
    for property in properties {
        let value = source.get_value(property).ok_or_else(|| {
            BulkError::unknown_property(std::any::type_name::<E>(), *property)
        })?;
        target.set_value(property, value)?;
    }
    Ok(())
}

fn key_set<E: Entity>(pk: &PrimaryKey, records: &[E]) -> BulkResult<HashSet<Key>> {
    records.iter().map(|r| pk.key_of(r)).collect()
}

#[async_trait]
impl<E: Entity> BulkExecutor<E> for MemoryExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::InMemory
    }

    async fn bulk_add(
        &self,
        conn: &mut dyn BulkConnection,
        records: &mut [E],
    ) -> BulkResult<BulkOutcome> {
        let pk = PrimaryKey::of::<E>()?;
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let db = database(conn).await?;

        let mut changes = ChangeSet::<E>::new(&db)?;
        for record in records.iter() {
            changes.add(record.clone());
        }
        let saved = changes.save_changes()?;

        let mut outcome = BulkOutcome::affected(saved.rows_affected());
        for (record, added) in records.iter_mut().zip(&saved.added) {
            let key = pk.key_of(added)?;
            if pk.is_generated() {
                pk.set_key(record, &key)?;
            }
            outcome.inserted_keys.push(key);
        }
        debug!(
            entity = pk.entity(),
            inserted = outcome.inserted_keys.len(),
            "memory bulk add complete"
        );
        Ok(outcome)
    }

    async fn bulk_update(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        replacement: &E,
        properties: &[&str],
    ) -> BulkResult<u64> {
        let entity_type: EntityType = E::entity_type();
        PrimaryKey::of::<E>()?;
        validate_assignable(&entity_type, properties)?;
        let db = database(conn).await?;

        let mut changes = ChangeSet::<E>::new(&db)?;
        for mut row in db.select(query)? {
            copy_properties(replacement, &mut row, properties)?;
            changes.update(row);
        }
        Ok(changes.save_changes()?.updated)
    }

    async fn bulk_update_with(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        keys: &[Key],
        properties: &[&str],
        factory: &(dyn for<'k> Fn(&'k Key) -> E + Send + Sync),
    ) -> BulkResult<u64> {
        let entity_type: EntityType = E::entity_type();
        let pk = PrimaryKey::from_entity_type(&entity_type)?;
        if keys.is_empty() {
            return Ok(0);
        }
        pk.validate(keys)?;
        validate_assignable(&entity_type, properties)?;
        let db = database(conn).await?;

        let wanted = KeyPredicate::new(&pk, keys);
        let mut changes = ChangeSet::<E>::new(&db)?;
        for mut row in db.select(query)? {
            if !wanted.matches(&row) {
                continue;
            }
            let delta = factory(&pk.key_of(&row)?);
            copy_properties(&delta, &mut row, properties)?;
            changes.update(row);
        }
        Ok(changes.save_changes()?.updated)
    }

    async fn bulk_remove(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        filter_by_keys: bool,
        keys: &[Key],
    ) -> BulkResult<u64> {
        let pk = PrimaryKey::of::<E>()?;
        if filter_by_keys {
            if keys.is_empty() {
                return Ok(0);
            }
            pk.validate(keys)?;
        }
        let db = database(conn).await?;

        let wanted = filter_by_keys.then(|| KeyPredicate::new(&pk, keys));
        let mut changes = ChangeSet::<E>::new(&db)?;
        for row in db.select(query)? {
            if wanted.as_ref().is_none_or(|p| p.matches(&row)) {
                changes.remove(pk.key_of(&row)?);
            }
        }
        Ok(changes.save_changes()?.removed)
    }

    async fn bulk_merge(
        &self,
        conn: &mut dyn BulkConnection,
        query: &Query<E>,
        records: &mut [E],
        options: MergeOptions<E>,
    ) -> BulkResult<BulkOutcome> {
        let entity_type: EntityType = E::entity_type();
        let pk = PrimaryKey::from_entity_type(&entity_type)?;
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let update_names = merge_update_properties(&entity_type, &options.exclude_from_update)?;
        let update: Vec<&str> = update_names.iter().map(String::as_str).collect();
        if let NotMatchedBehavior::Update { properties, .. } = &options.not_matched {
            let names: Vec<&str> = properties.iter().map(String::as_str).collect();
            validate_assignable(&entity_type, &names)?;
        }
        let db = database(conn).await?;

        let previous = db
            .select(query)?
            .into_iter()
            .map(|row| Ok((pk.key_of(&row)?, row)))
            .collect::<BulkResult<IndexMap<Key, E>>>()?;
        let current = key_set(&pk, records)?;
        let mut changes = ChangeSet::<E>::new(&db)?;
        let mut inserts = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let key = pk.key_of(record)?;
            match previous.get(&key) {
                Some(row) if !update.is_empty() => {
                    let mut row = row.clone();
                    copy_properties(record, &mut row, &update)?;
                    changes.update(row);
                }
                Some(_) => {}
                None => {
                    let mut staged = record.clone();
                    for part in pk.parts().iter().filter(|p| p.generated) {
                        staged.set_value(&part.property, part.unset.clone())?;
                    }
                    changes.add(staged);
                    inserts.push(index);
                }
            }
        }

        for (key, row) in &previous {
            if current.contains(key) {
                continue;
            }
            match &options.not_matched {
                NotMatchedBehavior::DoNothing => {}
                NotMatchedBehavior::Delete => changes.remove(key.clone()),
                NotMatchedBehavior::Update {
                    replacement,
                    properties,
                } => {
                    let names: Vec<&str> = properties.iter().map(String::as_str).collect();
                    let mut row = row.clone();
                    copy_properties(replacement, &mut row, &names)?;
                    changes.update(row);
                }
            }
        }

        let saved = changes.save_changes()?;
        let mut outcome = BulkOutcome::affected(saved.rows_affected());
        for (index, added) in inserts.into_iter().zip(&saved.added) {
            let key = pk.key_of(added)?;
            if pk.is_generated() {
                pk.set_key(&mut records[index], &key)?;
            }
            outcome.inserted_keys.push(key);
        }
        debug!(
            entity = pk.entity(),
            affected = outcome.rows_affected,
            inserted = outcome.inserted_keys.len(),
            "memory bulk merge complete"
        );
        Ok(outcome)
    }
}
