//! Dispersal Placement - weighted hierarchical fragment placement
//!
//! Maps fragment identifiers onto a capacity-weighted tree of failure
//! domains (racks, servers, drives, ...). Every level of the tree owns a
//! contiguous slice of the identifier bits and uses it as the draw value
//! for a weighted choice among the current domain's children, so a
//! placement is a pure function of the identifier and the map.
//!
//! # Pipeline
//!
//! 1. [`TopologyBuilder`] generates (or accepts) the domain tree
//! 2. [`aggregate_weights`] sums leaf capacities up the tree
//! 3. [`normalize_distributions`] turns weights into integer pdf/cdf tables
//! 4. [`Topology::finalize`] compacts the result into a [`PlacementMap`]
//! 5. [`PlacementDriver`] walks the map, one [`WeightedSampler`] draw per level
//!
//! # Example
//! ```ignore
//! use dispersal_placement::{PlacementService, Config};
//!
//! let service = PlacementService::from_config(&Config::default())?;
//! let placements = service.place_object("bucket/key", 6)?;
//! ```

pub mod bits;
pub mod driver;
pub mod sampler;
pub mod service;
pub mod topology;

pub use bits::{BitLayout, BitRange};
pub use driver::PlacementDriver;
pub use sampler::{SampleError, WeightedSampler};
pub use service::{FragmentPlacement, PlacementService, Snapshot};
pub use topology::{
    Distribution, Domain, MapLevel, MapNode, PlacementMap, ROOT_ID, Topology, TopologyBuilder,
    aggregate_weights, normalize_distributions,
};

pub use dispersal_common::{Config, Error, FragmentId, PlacementPath, Result};
