//! The multi-indexed resource store
//!
//! An in-memory collection of [`Resource`]s supporting the operations the
//! Registration, Query and Node APIs need: hashed lookup by id, iteration in
//! update order, health-ordered scans for expiry, and a parent→children
//! index for cascades.
//!
//! # Invariants
//!
//! - `id` is unique across all types.
//! - `updated` stamps are unique and totally ordered across the store; any
//!   assignment picks `max(now, latest + 1ns)` so that two mutations within
//!   the same nanosecond still order.
//! - Whenever a child exists, its declared parent exists (unless inserted
//!   with `allow_invalid`), except transiently inside a cascade.
//! - `data.version` mirrors `updated` in string form for the registrable
//!   types.
//!
//! All mutation goes through the owning model's single lock; the store
//! itself is plain data.

use rnmos_core::{ApiError, Health, Resource, ResourceType, Result, Tai, HEALTH_FOREVER};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The indexed resource collection
#[derive(Debug, Default)]
pub struct Resources {
    by_id: HashMap<String, Resource>,
    /// Unique, totally ordered; the replay/fanout ordering basis
    by_updated: BTreeMap<Tai, String>,
    /// (health, id) pairs; `HEALTH_FOREVER` entries never expire
    by_health: BTreeSet<(Health, String)>,
    /// parent id → child ids, driving cascades
    children: HashMap<String, BTreeSet<String>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// The largest `updated` stamp in the store
    pub fn most_recent_update(&self) -> Tai {
        self.by_updated
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default()
    }

    /// The next `updated` stamp: `max(now, latest + 1ns)`
    pub fn strictly_increasing_update(&self) -> Tai {
        let now = Tai::now();
        let successor = self.most_recent_update().successor();
        if now > successor {
            now
        } else {
            successor
        }
    }

    pub fn find(&self, id: &str) -> Option<&Resource> {
        self.by_id.get(id)
    }

    pub fn has(&self, id: &str, type_: ResourceType) -> bool {
        self.by_id.get(id).map(|r| r.type_ == type_).unwrap_or(false)
    }

    /// Resources of one type, in update order
    pub fn iterate_by_type(&self, type_: ResourceType) -> impl Iterator<Item = &Resource> {
        self.iterate().filter(move |r| r.type_ == type_)
    }

    /// All resources, in update order
    pub fn iterate(&self) -> impl Iterator<Item = &Resource> {
        self.by_updated.values().filter_map(|id| self.by_id.get(id))
    }

    /// Insert a new resource
    ///
    /// Assigns `created`/`updated` and rewrites `data.version`. Fails with
    /// `DuplicateId` when the id is taken and `ParentMissing` when the
    /// declared parent is absent, unless `allow_invalid` copes with
    /// out-of-order registrations.
    pub fn insert(&mut self, mut resource: Resource, allow_invalid: bool) -> Result<()> {
        if resource.id.is_empty() {
            return Err(ApiError::MalformedRequest("resource has no id".to_string()));
        }
        if self.by_id.contains_key(&resource.id) {
            return Err(ApiError::DuplicateId(resource.id));
        }
        if !allow_invalid {
            if let Some((parent_id, parent_type)) = resource.super_resource() {
                if !self.has(&parent_id, parent_type) {
                    return Err(ApiError::ParentMissing(format!(
                        "{} {} references missing {} {}",
                        resource.type_, resource.id, parent_type, parent_id
                    )));
                }
            } else if resource.type_.parent_field().is_some() {
                return Err(ApiError::ParentMissing(format!(
                    "{} {} declares no parent",
                    resource.type_, resource.id
                )));
            }
        }

        let updated = self.strictly_increasing_update();
        resource.created = updated;
        resource.updated = updated;
        write_version(&mut resource);

        if let Some((parent_id, _)) = resource.super_resource() {
            self.children
                .entry(parent_id)
                .or_default()
                .insert(resource.id.clone());
        }
        self.by_updated.insert(updated, resource.id.clone());
        self.by_health
            .insert((resource.health, resource.id.clone()));
        self.by_id.insert(resource.id.clone(), resource);
        Ok(())
    }

    /// Run a mutator against a resource, then reassign `updated`
    ///
    /// The mutator sees the resource with its old stamps; afterwards
    /// `updated` advances per the strictly-increasing rule and
    /// `data.version` is rewritten. Returns false when the id is unknown.
    pub fn modify(&mut self, id: &str, mutator: impl FnOnce(&mut Resource)) -> bool {
        // take the resource out so the updated index can be rewritten around it
        let Some(mut resource) = self.by_id.remove(id) else {
            return false;
        };
        self.by_updated.remove(&resource.updated);
        self.by_health.remove(&(resource.health, resource.id.clone()));
        let old_parent = resource.super_resource();

        mutator(&mut resource);
        resource.id = id.to_string();

        let updated = self.strictly_increasing_update();
        resource.updated = updated;
        write_version(&mut resource);

        let new_parent = resource.super_resource();
        if old_parent != new_parent {
            if let Some((old_id, _)) = old_parent {
                if let Some(set) = self.children.get_mut(&old_id) {
                    set.remove(id);
                }
            }
            if let Some((new_id, _)) = &new_parent {
                self.children
                    .entry(new_id.clone())
                    .or_default()
                    .insert(id.to_string());
            }
        }

        self.by_updated.insert(updated, id.to_string());
        self.by_health.insert((resource.health, id.to_string()));
        self.by_id.insert(id.to_string(), resource);
        true
    }

    /// Erase a resource and all of its descendants
    ///
    /// Returns the removed resources, deepest first, for event generation.
    pub fn erase(&mut self, id: &str) -> Vec<Resource> {
        let mut removed = Vec::new();
        self.erase_recursive(id, &mut removed);
        removed
    }

    fn erase_recursive(&mut self, id: &str, removed: &mut Vec<Resource>) {
        if let Some(child_ids) = self.children.remove(id) {
            for child in child_ids {
                self.erase_recursive(&child, removed);
            }
        }
        if let Some(resource) = self.by_id.remove(id) {
            self.by_updated.remove(&resource.updated);
            self.by_health.remove(&(resource.health, resource.id.clone()));
            if let Some((parent_id, _)) = resource.super_resource() {
                if let Some(set) = self.children.get_mut(&parent_id) {
                    set.remove(id);
                }
            }
            removed.push(resource);
        }
    }

    /// Refresh the health of a resource and all of its descendants
    pub fn set_health(&mut self, id: &str, health: Health) -> bool {
        if !self.by_id.contains_key(id) {
            return false;
        }
        self.set_health_recursive(id, health);
        true
    }

    fn set_health_recursive(&mut self, id: &str, health: Health) {
        if let Some(resource) = self.by_id.get_mut(id) {
            // permanent resources stay permanent
            if resource.health != HEALTH_FOREVER {
                self.by_health.remove(&(resource.health, id.to_string()));
                resource.health = health;
                self.by_health.insert((health, id.to_string()));
            }
        }
        let child_ids: Vec<String> = self
            .children
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for child in child_ids {
            self.set_health_recursive(&child, health);
        }
    }

    /// Remove every resource whose health is below the cutoff
    ///
    /// Cascades through descendants, so a stale node takes its whole tree
    /// with it even if some child heartbeated independently. Returns the
    /// removed resources for event generation.
    pub fn erase_expired(&mut self, cutoff: Health) -> Vec<Resource> {
        let expired: Vec<String> = self
            .by_health
            .range(..(cutoff, String::new()))
            .map(|(_, id)| id.clone())
            .collect();
        let mut removed = Vec::new();
        for id in expired {
            // may already be gone as a descendant of an earlier cascade
            if self.by_id.contains_key(&id) {
                self.erase_recursive(&id, &mut removed);
            }
        }
        removed
    }

    /// The smallest health value that can expire, if any
    pub fn next_expiry(&self) -> Option<Health> {
        self.by_health
            .iter()
            .next()
            .map(|(h, _)| *h)
            .filter(|h| *h != HEALTH_FOREVER)
    }
}

/// Mirror `updated` into `data.version` for the types that carry one
fn write_version(resource: &mut Resource) {
    match resource.type_ {
        ResourceType::Subscription | ResourceType::Grain => {}
        _ => {
            if let Some(obj) = resource.data.as_object_mut() {
                obj.insert(
                    "version".to_string(),
                    serde_json::Value::String(resource.updated.to_string()),
                );
            }
        }
    }
}
