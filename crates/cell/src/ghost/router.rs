use std::collections::HashMap;

use crate::error::CellError;
use crate::net::Directory;
use crate::types::{EntityId, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// A ghost lives here and its real is at `owner`.
    Ghost,
    /// The real used to live here and moved to `owner`.
    Migrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub owner: ProcessId,
    pub kind: RouteKind,
    pub last_used_tick: u64,
}

/// Maps entities that are not real on this process to the process that owns them.
#[derive(Debug)]
pub struct GhostRouter {
    routes: HashMap<EntityId, Route>,
    migrated_ttl_ticks: u64,
}

impl GhostRouter {
    pub fn new(migrated_ttl_ticks: u32) -> Self {
        Self {
            routes: HashMap::new(),
            migrated_ttl_ticks: migrated_ttl_ticks as u64,
        }
    }

    pub fn add_ghost_route(&mut self, entity: EntityId, owner: ProcessId, now: u64) {
        self.routes.insert(
            entity,
            Route {
                owner,
                kind: RouteKind::Ghost,
                last_used_tick: now,
            },
        );
    }

    pub fn add_migrated(&mut self, entity: EntityId, owner: ProcessId, now: u64) {
        self.routes.insert(
            entity,
            Route {
                owner,
                kind: RouteKind::Migrated,
                last_used_tick: now,
            },
        );
    }

    /// Points an existing route at a new owner. Returns false when there is no route.
    pub fn set_owner(&mut self, entity: EntityId, owner: ProcessId, now: u64) -> bool {
        match self.routes.get_mut(&entity) {
            Some(route) => {
                route.owner = owner;
                route.last_used_tick = now;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, entity: EntityId) -> Option<Route> {
        self.routes.remove(&entity)
    }

    pub fn get(&self, entity: EntityId) -> Option<&Route> {
        self.routes.get(&entity)
    }

    /// Finds the owner of `entity`, failing when the route is missing or its process is gone.
    pub fn resolve(
        &mut self,
        entity: EntityId,
        now: u64,
        directory: &dyn Directory,
    ) -> Result<ProcessId, CellError> {
        let route = self
            .routes
            .get_mut(&entity)
            .ok_or(CellError::RouteNotFound { entity })?;
        if !directory.is_alive(route.owner) {
            return Err(CellError::RouteNotFound { entity });
        }
        route.last_used_tick = now;
        Ok(route.owner)
    }

    /// Drops migrated-away routes nobody has used for the configured number of ticks.
    pub fn expire(&mut self, now: u64) -> Vec<EntityId> {
        let ttl = self.migrated_ttl_ticks;
        let expired: Vec<EntityId> = self
            .routes
            .iter()
            .filter(|(_, route)| {
                route.kind == RouteKind::Migrated && now.saturating_sub(route.last_used_tick) > ttl
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.routes.remove(id);
        }
        expired
    }

    /// Drops every route whose owner the directory no longer knows.
    pub fn collect_garbage(&mut self, directory: &dyn Directory) -> Vec<EntityId> {
        let dead: Vec<EntityId> = self
            .routes
            .iter()
            .filter(|(_, route)| !directory.is_alive(route.owner))
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.routes.remove(id);
        }
        dead
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ClusterDirectory;

    fn directory() -> ClusterDirectory {
        let directory = ClusterDirectory::new();
        directory.register(1);
        directory.register(2);
        directory
    }

    #[test]
    fn resolve_requires_live_owner() {
        let directory = directory();
        let mut router = GhostRouter::new(10);
        router.add_ghost_route(5, 2, 0);
        assert_eq!(router.resolve(5, 1, &directory).unwrap(), 2);
        assert!(matches!(
            router.resolve(6, 1, &directory),
            Err(CellError::RouteNotFound { entity: 6 })
        ));

        directory.deregister(2);
        assert!(router.resolve(5, 2, &directory).is_err());
        assert_eq!(router.collect_garbage(&directory), vec![5]);
        assert!(router.is_empty());
    }

    #[test]
    fn migrated_routes_expire_after_ttl_without_use() {
        let directory = directory();
        let mut router = GhostRouter::new(10);
        router.add_migrated(5, 2, 0);
        router.add_ghost_route(6, 2, 0);

        assert!(router.expire(8).is_empty());
        router.resolve(5, 8, &directory).unwrap();
        assert!(router.expire(18).is_empty());
        assert_eq!(router.expire(19), vec![5]);
        assert!(router.get(6).is_some());
    }
}
