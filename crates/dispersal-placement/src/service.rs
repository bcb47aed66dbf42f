//! Versioned placement map holder
//!
//! Placements read an immutable snapshot; capacity changes build a new
//! map and publish it atomically. A caller that took a snapshot keeps
//! placing against it until it asks for a new one.

use crate::driver::PlacementDriver;
use crate::topology::{PlacementMap, Topology};
use dispersal_common::{Config, FragmentId, PlacementPath, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Published map with its version number
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Increases by one on every publish
    pub version: u64,
    /// Map placements run against
    pub map: Arc<PlacementMap>,
}

impl Snapshot {
    /// Driver bound to this snapshot's map
    #[must_use]
    pub fn driver(&self) -> PlacementDriver {
        PlacementDriver::new(Arc::clone(&self.map))
    }
}

/// Placement of one fragment of an object
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FragmentPlacement {
    /// Fragment index within the object
    pub index: u32,
    /// Identifier derived from the object key and index
    pub id: FragmentId,
    /// Domain ids from the first level to the leaf
    pub path: PlacementPath,
}

/// Placement entry point shared by concurrent callers
pub struct PlacementService {
    current: RwLock<Snapshot>,
}

impl PlacementService {
    /// Serve `map` as version 1
    #[must_use]
    pub fn new(map: PlacementMap) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                version: 1,
                map: Arc::new(map),
            }),
        }
    }

    /// Build the topology described by `config` and serve it
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(build_map(config)?))
    }

    /// Current map and version
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.current.read().clone()
    }

    /// Version of the current map
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Replace the current map, returning the new version
    pub fn publish(&self, map: PlacementMap) -> u64 {
        let leaves = map.leaves().count();
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Snapshot {
            version,
            map: Arc::new(map),
        };
        drop(current);

        info!(version, leaves, "published placement map");
        version
    }

    /// Build a new map from `config` and publish it
    ///
    /// On error the current map stays in place.
    pub fn rebuild(&self, config: &Config) -> Result<u64> {
        let map = build_map(config)?;
        Ok(self.publish(map))
    }

    /// Place one fragment on the current map
    pub fn place(&self, id: &FragmentId) -> Result<PlacementPath> {
        self.snapshot().driver().place(id)
    }

    /// Place the fragments of one object on the current map
    pub fn place_batch(&self, ids: &[FragmentId]) -> Result<Vec<PlacementPath>> {
        self.snapshot().driver().place_batch(ids)
    }

    /// Derive `fragments` identifiers for `object_key` and place them as one batch
    pub fn place_object(&self, object_key: &str, fragments: u32) -> Result<Vec<FragmentPlacement>> {
        let snapshot = self.snapshot();
        let bits = snapshot.map.layout().identifier_bits();
        let ids = (0..fragments)
            .map(|index| FragmentId::derive(object_key, index, bits))
            .collect::<Result<Vec<_>>>()?;
        let paths = snapshot.driver().place_batch(&ids)?;

        Ok((0..fragments)
            .zip(ids)
            .zip(paths)
            .map(|((index, id), path)| FragmentPlacement { index, id, path })
            .collect())
    }
}

fn build_map(config: &Config) -> Result<PlacementMap> {
    config.validate()?;
    Ok(Topology::from_config(config)?.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispersal_common::{DomainSpec, Error, LevelSpec};

    fn seeded(seed: u64) -> Config {
        let mut config = Config::default();
        config.seed = Some(seed);
        config
    }

    fn single_level(ids: &[&str]) -> Config {
        let mut config = Config::default();
        config.identifier_bits = 8;
        config.levels = vec![LevelSpec::new("Drive", 0, 4)];
        config.topology = Some(DomainSpec::node(
            crate::topology::ROOT_ID,
            ids.iter().map(|id| DomainSpec::leaf(*id, None)).collect(),
        ));
        config
    }

    #[test]
    fn test_publish_bumps_version() {
        let service = PlacementService::from_config(&seeded(3)).unwrap();
        assert_eq!(service.version(), 1);
        assert_eq!(service.rebuild(&seeded(4)).unwrap(), 2);
        assert_eq!(service.rebuild(&seeded(5)).unwrap(), 3);
        assert_eq!(service.snapshot().version, 3);
    }

    #[test]
    fn test_failed_rebuild_keeps_current_map() {
        let service = PlacementService::from_config(&seeded(3)).unwrap();
        let before = service.snapshot();

        let mut bad = seeded(3);
        bad.levels[0].bits = 0;
        assert!(matches!(service.rebuild(&bad), Err(Error::InvalidSpec(_))));

        let after = service.snapshot();
        assert_eq!(after.version, before.version);
        assert!(Arc::ptr_eq(&after.map, &before.map));
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let service = PlacementService::from_config(&single_level(&["old1", "old2"])).unwrap();
        let held = service.snapshot();
        service.rebuild(&single_level(&["new1", "new2"])).unwrap();

        let id: FragmentId = "c0".parse().unwrap();
        assert_eq!(held.driver().place(&id).unwrap().leaf(), Some("old2"));
        assert_eq!(service.place(&id).unwrap().leaf(), Some("new2"));
    }

    #[test]
    fn test_place_object() {
        let service = PlacementService::from_config(&seeded(11)).unwrap();
        let placements = service.place_object("photos/cat.jpg", 3).unwrap();

        assert_eq!(placements.len(), 3);
        for (n, placement) in placements.iter().enumerate() {
            assert_eq!(placement.index as usize, n);
            assert_eq!(placement.id.bits(), 32);
            assert_eq!(placement.path.len(), 3);
            assert_eq!(service.place(&placement.id).unwrap().len(), 3);
        }
        assert_eq!(placements, service.place_object("photos/cat.jpg", 3).unwrap());
        assert!(service.place_object("photos/cat.jpg", 0).unwrap().is_empty());
    }

    #[test]
    fn test_readers_see_whole_maps_during_publish() {
        let service = PlacementService::from_config(&single_level(&["old1", "old2"])).unwrap();
        let ids: Vec<FragmentId> = (0..=255u8)
            .map(|b| FragmentId::parse(&format!("{b:02x}"), 8).unwrap())
            .collect();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let snapshot = service.snapshot();
                        let prefix = if snapshot.version % 2 == 1 { "old" } else { "new" };
                        let paths = snapshot.driver().place_batch(&ids).unwrap();
                        assert!(paths
                            .iter()
                            .all(|p| p.leaf().is_some_and(|leaf| leaf.starts_with(prefix))));
                    }
                });
            }
            scope.spawn(|| {
                for round in 0..20 {
                    let names: &[&str] = if round % 2 == 0 {
                        &["new1", "new2"]
                    } else {
                        &["old1", "old2"]
                    };
                    service.rebuild(&single_level(names)).unwrap();
                }
            });
        });

        assert_eq!(service.version(), 21);
    }
}
