use crate::entity::{EntityKey, EntityRef};
use crate::metadata::JoinTableMetadata;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// A join row identified by its table and owning-side key pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LinkKey {
    pub table: String,
    pub owner: EntityKey,
    pub target: EntityKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOp {
    Link,
    Unlink,
}

/// Pending changes of one entity manager.
///
/// Link operations are keyed by their pair, so adding the same pair twice
/// records it once and a later operation on a pair replaces an earlier one.
#[derive(Debug)]
pub(crate) struct UnitOfWork {
    id: Uuid,
    inserts: Vec<EntityRef>,
    removals: Vec<EntityRef>,
    links: BTreeMap<LinkKey, LinkOp>,
    joins: HashMap<String, Arc<JoinTableMetadata>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            inserts: Vec::new(),
            removals: Vec::new(),
            links: BTreeMap::new(),
            joins: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn has_changes(&self) -> bool {
        !self.inserts.is_empty() || !self.removals.is_empty() || !self.links.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.inserts.len() + self.removals.len() + self.links.len()
    }

    pub fn inserts(&self) -> &[EntityRef] {
        &self.inserts
    }

    pub fn removals(&self) -> &[EntityRef] {
        &self.removals
    }

    pub fn links(&self) -> impl Iterator<Item = (&LinkKey, &LinkOp)> {
        self.links.iter()
    }

    pub fn join(&self, table: &str) -> Option<&Arc<JoinTableMetadata>> {
        self.joins.get(table)
    }

    pub fn schedule_insert(&mut self, entity: EntityRef) {
        self.inserts.push(entity);
    }

    /// Drop a pending insert. Returns whether one was pending.
    pub fn cancel_insert(&mut self, entity: &EntityRef) -> bool {
        let before = self.inserts.len();
        self.inserts.retain(|e| !e.same_entity(entity));
        before != self.inserts.len()
    }

    pub fn schedule_removal(&mut self, entity: EntityRef) {
        if !self.removals.iter().any(|e| e.same_entity(&entity)) {
            self.removals.push(entity);
        }
    }

    pub fn schedule_link(&mut self, join: &Arc<JoinTableMetadata>, owner: EntityKey, target: EntityKey, op: LinkOp) {
        self.joins
            .entry(join.table.clone())
            .or_insert_with(|| Arc::clone(join));
        self.links.insert(
            LinkKey {
                table: join.table.clone(),
                owner,
                target,
            },
            op,
        );
    }

    /// Forget pending link operations that reference `key` of `entity`.
    pub fn drop_links_involving(&mut self, entity: &str, key: &EntityKey) {
        let joins = &self.joins;
        self.links.retain(|link, _| {
            let Some(join) = joins.get(&link.table) else {
                return true;
            };
            let owner_hit = join.owner_entity == entity && &link.owner == key;
            let target_hit = join.target_entity == entity && &link.target == key;
            !(owner_hit || target_hit)
        });
    }

    /// Pending operations on `table` whose `owner_side` (or target side) key
    /// is `key`, as (other key, op) pairs.
    pub fn pending_for(&self, table: &str, owner_side: bool, key: &EntityKey) -> Vec<(EntityKey, LinkOp)> {
        self.links
            .iter()
            .filter(|(link, _)| link.table == table)
            .filter_map(|(link, op)| {
                if owner_side && &link.owner == key {
                    Some((link.target.clone(), *op))
                } else if !owner_side && &link.target == key {
                    Some((link.owner.clone(), *op))
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.inserts.clear();
        self.removals.clear();
        self.links.clear();
    }
}
