//! Placement topology
//!
//! A topology is built in explicit passes, each producing a new structure:
//!
//! 1. **Shape**: a [`DomainSpec`] tree, generated from the level specs or
//!    given explicitly.
//! 2. **Aggregation**: [`aggregate_weights`] turns it into a [`Domain`] tree
//!    with every leaf weighted (default 1) and every internal weight equal
//!    to the sum of its children.
//! 3. **Normalization**: [`normalize_distributions`] attaches to every
//!    internal domain an integer pdf/cdf scaled to the bit width of the
//!    level below it.
//! 4. **Finalization**: [`Topology::finalize`] drops the weights and yields
//!    the compact, read-only [`PlacementMap`] used for lookups.

use crate::bits::BitLayout;
use dispersal_common::{
    Config, DomainSpec, Error, LevelSpec, ReplacementPolicy, Result, WeightSpec, validate_levels,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Id given to the root of generated topologies
pub const ROOT_ID: &str = "root";

/// Integer mass function over the children of one domain
///
/// `pdf` sums to `max_value` and `cdf` is its running sum, so
/// `cdf[last] == max_value`. Both are empty when the children carry no
/// weight at all, which makes the domain unselectable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    /// Child ids, in sampling order
    pub ids: Vec<String>,
    /// Mass of each child
    pub pdf: Vec<u64>,
    /// Running sum of `pdf`
    pub cdf: Vec<u64>,
    /// Total mass, `2^width` of the sampled level
    pub max_value: u64,
}

impl Distribution {
    /// Scale `weights` to integers summing to `max_value`
    ///
    /// Each child gets `floor(w / total * max_value)`; the rounding loss
    /// goes to the last child with positive weight.
    #[must_use]
    pub fn from_weights(ids: Vec<String>, weights: &[f64], max_value: u64) -> Self {
        debug_assert_eq!(ids.len(), weights.len());
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Self {
                ids,
                pdf: Vec::new(),
                cdf: Vec::new(),
                max_value,
            };
        }

        let scale = max_value as f64;
        let mut pdf: Vec<u64> = weights
            .iter()
            .map(|w| ((w / total * scale).floor() as u64).min(max_value))
            .collect();

        settle_mass(&mut pdf, weights, max_value);

        let cdf = pdf
            .iter()
            .scan(0u64, |acc, mass| {
                *acc += mass;
                Some(*acc)
            })
            .collect();

        Self {
            ids,
            pdf,
            cdf,
            max_value,
        }
    }

    /// Check if the distribution has no mass
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pdf.is_empty()
    }

    /// Number of selectable children (0 when empty)
    #[must_use]
    pub fn len(&self) -> usize {
        self.pdf.len()
    }
}

/// Make `pdf` sum to exactly `max_value`
///
/// A shortfall goes to the last child with positive weight. An overshoot
/// (float rounding pushing floors over) is shaved from the tail.
fn settle_mass(pdf: &mut [u64], weights: &[f64], max_value: u64) {
    let assigned: u64 = pdf.iter().sum();
    if assigned <= max_value {
        if let Some(last) = weights.iter().rposition(|w| *w > 0.0) {
            pdf[last] += max_value - assigned;
        }
        return;
    }

    let mut excess = assigned - max_value;
    for mass in pdf.iter_mut().rev() {
        let cut = excess.min(*mass);
        *mass -= cut;
        excess -= cut;
        if excess == 0 {
            break;
        }
    }
}

/// Node of the weighted hierarchy
///
/// `depth` is 0 for the root; a domain at depth `d` belongs to level
/// `d - 1` and its distribution samples level `d`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Domain {
    /// Physical resource at the bottom of the hierarchy
    Leaf {
        id: String,
        depth: usize,
        weight: f64,
    },
    /// Failure domain holding child domains
    Internal {
        id: String,
        depth: usize,
        weight: f64,
        children: Vec<Domain>,
        /// Set by [`normalize_distributions`]
        distribution: Option<Distribution>,
    },
}

impl Domain {
    /// Domain id
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Leaf { id, .. } | Self::Internal { id, .. } => id,
        }
    }

    /// Depth below the root
    #[must_use]
    pub const fn depth(&self) -> usize {
        match self {
            Self::Leaf { depth, .. } | Self::Internal { depth, .. } => *depth,
        }
    }

    /// Capacity weight
    #[must_use]
    pub const fn weight(&self) -> f64 {
        match self {
            Self::Leaf { weight, .. } | Self::Internal { weight, .. } => *weight,
        }
    }

    /// Check if this is a leaf
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// Child domains (empty for leaves)
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match self {
            Self::Leaf { .. } => &[],
            Self::Internal { children, .. } => children,
        }
    }

    /// Distribution over the children, once normalized
    #[must_use]
    pub const fn distribution(&self) -> Option<&Distribution> {
        match self {
            Self::Leaf { .. } => None,
            Self::Internal { distribution, .. } => distribution.as_ref(),
        }
    }

    /// Visit this domain and all its descendants, depth first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Self)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

/// Aggregation pass: weight every domain of a shape tree
///
/// Leaves must sit exactly `levels` below the root. An unset leaf weight
/// counts as 1; internal weights are always the sum of their children.
pub fn aggregate_weights(spec: &DomainSpec, levels: usize) -> Result<Domain> {
    aggregate_at(spec, 0, levels)
}

fn aggregate_at(spec: &DomainSpec, depth: usize, levels: usize) -> Result<Domain> {
    if spec.id.is_empty() {
        return Err(Error::invalid_spec(format!(
            "domain at depth {depth} has an empty id"
        )));
    }

    if depth == levels {
        if !spec.children.is_empty() {
            return Err(Error::invalid_spec(format!(
                "domain {} is deeper than the {levels} configured levels",
                spec.id
            )));
        }
        let weight = spec.weight.unwrap_or(1.0);
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::invalid_spec(format!(
                "domain {}: weight must be a finite non-negative number, got {weight}",
                spec.id
            )));
        }
        return Ok(Domain::Leaf {
            id: spec.id.clone(),
            depth,
            weight,
        });
    }

    if spec.children.is_empty() {
        return Err(Error::invalid_spec(format!(
            "domain {} at depth {depth} has no children but {levels} levels are configured",
            spec.id
        )));
    }

    let mut seen = HashSet::with_capacity(spec.children.len());
    let mut children = Vec::with_capacity(spec.children.len());
    for child in &spec.children {
        if !seen.insert(child.id.as_str()) {
            return Err(Error::invalid_spec(format!(
                "domain {} has two children named {}",
                spec.id, child.id
            )));
        }
        children.push(aggregate_at(child, depth + 1, levels)?);
    }

    let weight: f64 = children.iter().map(Domain::weight).sum();
    if !weight.is_finite() {
        return Err(Error::invalid_spec(format!(
            "domain {}: children's weights sum past the representable range",
            spec.id
        )));
    }
    Ok(Domain::Internal {
        id: spec.id.clone(),
        depth,
        weight,
        children,
        distribution: None,
    })
}

/// Normalization pass: attach a distribution to every internal domain
///
/// Distributions are recomputed from the weights, so running the pass on
/// an already-normalized tree yields the same tree.
pub fn normalize_distributions(domain: &Domain, layout: &BitLayout) -> Result<Domain> {
    match domain {
        Domain::Leaf { .. } => Ok(domain.clone()),
        Domain::Internal {
            id,
            depth,
            weight,
            children,
            ..
        } => {
            let range = layout.range(*depth).ok_or_else(|| {
                Error::invalid_spec(format!("domain {id}: no bit range for level {depth}"))
            })?;
            let ids = children.iter().map(|c| c.id().to_string()).collect();
            let weights: Vec<f64> = children.iter().map(Domain::weight).collect();
            let distribution = Distribution::from_weights(ids, &weights, range.max_value());
            if distribution.is_empty() {
                debug!(domain = %id, "domain has no capacity, leaving it unselectable");
            }

            let children = children
                .iter()
                .map(|child| normalize_distributions(child, layout))
                .collect::<Result<Vec<_>>>()?;

            Ok(Domain::Internal {
                id: id.clone(),
                depth: *depth,
                weight: *weight,
                children,
                distribution: Some(distribution),
            })
        }
    }
}

/// Weighted, normalized hierarchy plus the levels it was built from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    levels: Vec<LevelSpec>,
    layout: BitLayout,
    root: Domain,
}

impl Topology {
    /// Build from configuration, generated or explicit
    pub fn from_config(config: &Config) -> Result<Self> {
        let builder = TopologyBuilder::from_config(config);
        match &config.topology {
            Some(tree) => builder.build_from_tree(tree),
            None => builder.build(),
        }
    }

    /// Level specs, root side first
    #[must_use]
    pub fn levels(&self) -> &[LevelSpec] {
        &self.levels
    }

    /// Bit range assignment
    #[must_use]
    pub const fn layout(&self) -> &BitLayout {
        &self.layout
    }

    /// Root domain
    #[must_use]
    pub const fn root(&self) -> &Domain {
        &self.root
    }

    /// Number of leaves
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.root.walk(&mut |d| {
            if d.is_leaf() {
                count += 1;
            }
        });
        count
    }

    /// Re-run the normalization pass
    pub fn normalize_distributions(&self) -> Result<Self> {
        Ok(Self {
            levels: self.levels.clone(),
            layout: self.layout.clone(),
            root: normalize_distributions(&self.root, &self.layout)?,
        })
    }

    /// Compact read-only form used for placement
    #[must_use]
    pub fn finalize(&self) -> PlacementMap {
        let mut nodes = Vec::new();
        compile(&self.root, &mut nodes);
        PlacementMap {
            levels: self
                .levels
                .iter()
                .map(|l| MapLevel {
                    label: l.label.clone(),
                    policy: l.policy(),
                })
                .collect(),
            layout: self.layout.clone(),
            nodes,
        }
    }
}

fn compile(domain: &Domain, nodes: &mut Vec<MapNode>) -> usize {
    let index = nodes.len();
    nodes.push(MapNode {
        id: domain.id().to_string(),
        depth: domain.depth(),
        children: Vec::new(),
        distribution: domain.distribution().cloned(),
    });
    let children = domain
        .children()
        .iter()
        .map(|child| compile(child, nodes))
        .collect();
    nodes[index].children = children;
    index
}

/// Builds topologies from level specs
#[derive(Clone, Debug)]
pub struct TopologyBuilder {
    levels: Vec<LevelSpec>,
    identifier_bits: u32,
    seed: Option<u64>,
}

impl TopologyBuilder {
    /// Create a builder for 32-bit identifiers
    #[must_use]
    pub const fn new(levels: Vec<LevelSpec>) -> Self {
        Self {
            levels,
            identifier_bits: 32,
            seed: None,
        }
    }

    /// Builder matching a configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            levels: config.levels.clone(),
            identifier_bits: config.identifier_bits,
            seed: config.seed,
        }
    }

    /// Set the identifier width
    #[must_use]
    pub const fn identifier_bits(mut self, bits: u32) -> Self {
        self.identifier_bits = bits;
        self
    }

    /// Seed the sampling of `[min, max]` weights
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Generate `count` children per domain at every level
    pub fn build(&self) -> Result<Topology> {
        if let Some(level) = self.levels.iter().find(|l| l.count == 0) {
            return Err(Error::invalid_spec(format!(
                "level {}: child count must be positive",
                level.label
            )));
        }
        validate_levels(&self.levels, self.identifier_bits)?;

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let shape = DomainSpec::node(ROOT_ID, expand(&self.levels, 0, &[], &mut rng));
        self.assemble(&shape)
    }

    /// Use an explicit tree whose leaves sit one level per spec below the root
    pub fn build_from_tree(&self, root: &DomainSpec) -> Result<Topology> {
        validate_levels(&self.levels, self.identifier_bits)?;
        self.assemble(root)
    }

    fn assemble(&self, shape: &DomainSpec) -> Result<Topology> {
        let layout = BitLayout::from_levels(&self.levels, self.identifier_bits)?;
        let weighted = aggregate_weights(shape, self.levels.len())?;
        let root = normalize_distributions(&weighted, &layout)?;

        let topology = Topology {
            levels: self.levels.clone(),
            layout,
            root,
        };
        info!(
            levels = topology.levels.len(),
            leaves = topology.leaf_count(),
            weight = topology.root.weight(),
            "built placement topology"
        );
        Ok(topology)
    }
}

/// Generate the children of a domain at `depth`, named by label and path
fn expand<R: Rng>(
    levels: &[LevelSpec],
    depth: usize,
    path: &[usize],
    rng: &mut R,
) -> Vec<DomainSpec> {
    let Some(level) = levels.get(depth) else {
        return Vec::new();
    };

    let mut children = Vec::with_capacity(level.count);
    for number in 1..=level.count {
        let mut child_path = path.to_vec();
        child_path.push(number);
        let suffix = child_path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("-");

        let weight = level.weight.map(|spec| sample_weight(spec, rng));
        children.push(DomainSpec {
            id: format!("{}{suffix}", level.label),
            weight,
            children: expand(levels, depth + 1, &child_path, rng),
        });
    }
    children
}

fn sample_weight<R: Rng>(spec: WeightSpec, rng: &mut R) -> f64 {
    match spec {
        WeightSpec::Fixed(weight) => weight,
        WeightSpec::Range([min, max]) if min >= max => min,
        WeightSpec::Range([min, max]) => rng.gen_range(min..=max),
    }
}

/// Sampling settings of one level in a [`PlacementMap`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLevel {
    /// Level label
    pub label: String,
    /// Replacement policy applied when sampling this level
    pub policy: ReplacementPolicy,
}

/// Domain of a [`PlacementMap`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapNode {
    /// Domain id
    pub id: String,
    /// Depth below the root
    pub depth: usize,
    /// Indices of the children in the map, in distribution order
    pub children: Vec<usize>,
    /// Distribution over the children; `None` for leaves
    pub distribution: Option<Distribution>,
}

/// Finalized topology: ids and pdf/cdf per domain, no weights
///
/// Immutable once built. Capacity changes produce a new map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlacementMap {
    levels: Vec<MapLevel>,
    layout: BitLayout,
    nodes: Vec<MapNode>,
}

impl PlacementMap {
    /// Level settings, root side first
    #[must_use]
    pub fn levels(&self) -> &[MapLevel] {
        &self.levels
    }

    /// Bit range assignment
    #[must_use]
    pub const fn layout(&self) -> &BitLayout {
        &self.layout
    }

    /// Root domain
    #[must_use]
    pub fn root(&self) -> &MapNode {
        &self.nodes[0]
    }

    /// Domain at `index`
    #[must_use]
    pub fn node(&self, index: usize) -> Option<&MapNode> {
        self.nodes.get(index)
    }

    /// All domains, root first
    #[must_use]
    pub fn nodes(&self) -> &[MapNode] {
        &self.nodes
    }

    /// Leaf domains
    pub fn leaves(&self) -> impl Iterator<Item = &MapNode> {
        self.nodes.iter().filter(|n| n.children.is_empty())
    }
}
