//! Level-by-level placement traversal
//!
//! Starting at the root, each level slices the identifier bits it owns,
//! draws a child from the current domain's distribution and descends,
//! until a leaf is reached. Batches place the fragments of one object
//! together: fragments that sit in the same domain are drawn as one
//! sampler batch, so a level without replacement spreads them over
//! distinct children.

use crate::sampler::{SampleError, WeightedSampler};
use crate::topology::{MapNode, PlacementMap};
use dispersal_common::{Error, FragmentId, PlacementPath, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Places fragments on one immutable placement map
#[derive(Clone, Debug)]
pub struct PlacementDriver {
    map: Arc<PlacementMap>,
}

impl PlacementDriver {
    /// Create a driver over `map`
    #[must_use]
    pub const fn new(map: Arc<PlacementMap>) -> Self {
        Self { map }
    }

    /// Map this driver reads
    #[must_use]
    pub const fn map(&self) -> &Arc<PlacementMap> {
        &self.map
    }

    /// Place a single fragment, returning domain ids from the first level to the leaf
    pub fn place(&self, id: &FragmentId) -> Result<PlacementPath> {
        let layout = self.map.layout();
        let mut node = self.map.root();
        let mut path = PlacementPath::new();

        for level in 0..self.map.levels().len() {
            let value = layout.slice(id, level)?;
            let child = self
                .descend(node, level, &[value])?
                .first()
                .copied()
                .ok_or_else(|| Error::no_capacity(node.id.clone()))?;
            node = self.child(node, child)?;
            path.push(node.id.clone());
        }

        debug!(fragment = %id, path = %path, "placed fragment");
        Ok(path)
    }

    /// Place the fragments of one object, one path per identifier in input order
    pub fn place_batch(&self, ids: &[FragmentId]) -> Result<Vec<PlacementPath>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let layout = self.map.layout();
        let mut paths = vec![PlacementPath::new(); ids.len()];
        let mut groups: Vec<(usize, Vec<usize>)> = vec![(0, (0..ids.len()).collect())];

        for level in 0..self.map.levels().len() {
            let mut next: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for (node_index, members) in &groups {
                let node = self
                    .map
                    .node(*node_index)
                    .ok_or_else(|| Error::no_capacity(format!("#{node_index}")))?;
                let values = members
                    .iter()
                    .map(|&member| layout.slice(&ids[member], level))
                    .collect::<Result<Vec<_>>>()?;

                let children = self.descend(node, level, &values)?;
                for (&member, child) in members.iter().zip(children) {
                    paths[member].push(self.child(node, child)?.id.clone());
                    next.entry(child).or_default().push(member);
                }
            }
            groups = next.into_iter().collect();
        }

        debug!(fragments = ids.len(), "placed fragment batch");
        Ok(paths)
    }

    /// Draw children of `node` for `values`, returned as map indices
    fn descend(&self, node: &MapNode, level: usize, values: &[u64]) -> Result<Vec<usize>> {
        let distribution = node
            .distribution
            .as_ref()
            .ok_or_else(|| Error::no_capacity(node.id.clone()))?;
        let policy = self
            .map
            .levels()
            .get(level)
            .map(|l| l.policy)
            .ok_or_else(|| Error::invalid_spec(format!("no level {level} in placement map")))?;

        let picks = WeightedSampler::new(distribution)
            .draw(policy, values)
            .map_err(|e| sample_error(node, e))?;

        picks
            .into_iter()
            .map(|pick| {
                node.children.get(pick).copied().ok_or_else(|| {
                    warn!(domain = %node.id, pick, "drawn index has no live child");
                    Error::no_capacity(node.id.clone())
                })
            })
            .collect()
    }

    fn child(&self, parent: &MapNode, index: usize) -> Result<&MapNode> {
        self.map
            .node(index)
            .ok_or_else(|| Error::no_capacity(parent.id.clone()))
    }
}

fn sample_error(node: &MapNode, err: SampleError) -> Error {
    let domain = node.id.clone();
    match err {
        SampleError::NoCapacity => {
            warn!(domain = %domain, "domain has no capacity");
            Error::NoCapacity { domain }
        }
        SampleError::InsufficientTargets {
            available,
            required,
        } => {
            warn!(domain = %domain, available, required, "not enough distinct children");
            Error::InsufficientTargets {
                domain,
                available,
                required,
            }
        }
        SampleError::Underflow { value } => {
            error!(domain = %domain, value, "draw value not absorbed, placement map is inconsistent");
            Error::DrawUnderflow { domain, value }
        }
    }
}
