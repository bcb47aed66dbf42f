//! Core type definitions for Dispersal
//!
//! This module defines the fundamental types used throughout the system:
//! the fragment identifier that drives placement, the per-level topology
//! specifications and the placement path handed to storage backends.

use crate::error::{Error, Result};
use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Widest identifier accepted (one SHA-256 digest)
pub const MAX_IDENTIFIER_BITS: u32 = 256;

/// Widest bit range a single level may own
pub const MAX_LEVEL_BITS: u32 = 32;

/// Fixed-width dispersion identifier of one fragment
///
/// Stored big-endian. Bit 0 is the most significant bit of the first hex
/// digit, so a level owning `[0, 6)` reads the top six bits.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FragmentId {
    bytes: Vec<u8>,
    bits: u32,
}

impl FragmentId {
    /// Parse a hex identifier and require it to be exactly `bits` wide
    pub fn parse(hex_str: &str, bits: u32) -> Result<Self> {
        let id: Self = hex_str.parse()?;
        if id.bits != bits {
            return Err(Error::invalid_identifier(format!(
                "{hex_str}: expected a {bits}-bit identifier, got {} bits",
                id.bits
            )));
        }
        Ok(id)
    }

    /// Identifier taken from the leading bits of the SHA-256 digest of `content`
    pub fn from_content(content: &[u8], bits: u32) -> Result<Self> {
        check_width(bits)?;
        let digest = hex::encode(Sha256::digest(content));
        Self::from_hex_digits(&digest[..(bits / 4) as usize])
    }

    /// Identifier for fragment `fragment` of the object stored under `object_key`
    ///
    /// Pure function of its inputs: the same key and fragment index always
    /// map to the same identifier.
    pub fn derive(object_key: &str, fragment: u32, bits: u32) -> Result<Self> {
        check_width(bits)?;
        let mut input = Vec::with_capacity(object_key.len() + 4);
        input.extend_from_slice(object_key.as_bytes());
        input.extend_from_slice(&fragment.to_be_bytes());

        let digits = (bits / 4) as usize;
        let mut hex_str = String::with_capacity(digits + 16);
        let mut seed = 0u64;
        while hex_str.len() < digits {
            let word = xxhash_rust::xxh64::xxh64(&input, seed);
            hex_str.push_str(&format!("{word:016x}"));
            seed += 1;
        }
        hex_str.truncate(digits);
        Self::from_hex_digits(&hex_str)
    }

    fn from_hex_digits(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() {
            return Err(Error::invalid_identifier("empty identifier"));
        }
        let bits = u32::try_from(digits.len())
            .ok()
            .and_then(|n| n.checked_mul(4))
            .filter(|b| *b <= MAX_IDENTIFIER_BITS)
            .ok_or_else(|| {
                Error::invalid_identifier(format!(
                    "{s}: wider than {MAX_IDENTIFIER_BITS} bits"
                ))
            })?;

        let bytes = if digits.len() % 2 == 1 {
            hex::decode(format!("0{digits}"))
        } else {
            hex::decode(digits)
        }
        .map_err(|e| Error::invalid_identifier(format!("{s}: {e}")))?;

        Ok(Self { bytes, bits })
    }

    /// Width of the identifier in bits
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Read bits `[start, end)` as an unsigned big-endian integer
    ///
    /// Returns `None` if the range is reversed, exceeds the identifier or
    /// is wider than 64 bits.
    #[must_use]
    pub fn extract(&self, start: u32, end: u32) -> Option<u64> {
        if start > end || end > self.bits || end - start > 64 {
            return None;
        }
        let pad = self.bytes.len() as u32 * 8 - self.bits;
        let value = (start..end).fold(0u64, |acc, index| {
            let pos = pad + index;
            let byte = self.bytes[(pos / 8) as usize];
            let bit = (byte >> (7 - pos % 8)) & 1;
            (acc << 1) | u64::from(bit)
        });
        Some(value)
    }

    /// Lowercase hex rendering, one digit per four bits
    #[must_use]
    pub fn to_hex(&self) -> String {
        let encoded = hex::encode(&self.bytes);
        if self.bits % 8 == 4 {
            encoded[1..].to_string()
        } else {
            encoded
        }
    }
}

const fn is_valid_width(bits: u32) -> bool {
    bits > 0 && bits % 4 == 0 && bits <= MAX_IDENTIFIER_BITS
}

fn check_width(bits: u32) -> Result<()> {
    if !is_valid_width(bits) {
        return Err(Error::invalid_identifier(format!(
            "identifier width must be a positive multiple of 4 up to {MAX_IDENTIFIER_BITS}, got {bits}"
        )));
    }
    Ok(())
}

impl FromStr for FragmentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex_digits(s)
    }
}

impl TryFrom<String> for FragmentId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FragmentId> for String {
    fn from(id: FragmentId) -> Self {
        id.to_hex()
    }
}

impl fmt::Debug for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentId({})", self.to_hex())
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Whether one sampling batch may pick the same child more than once
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    /// Several fragments may land in the same child
    #[default]
    WithReplacement,
    /// Every fragment of the batch lands in a distinct child
    WithoutReplacement,
}

impl ReplacementPolicy {
    /// Map the `replacement` flag of a level spec
    #[must_use]
    pub const fn from_flag(replacement: bool) -> Self {
        if replacement {
            Self::WithReplacement
        } else {
            Self::WithoutReplacement
        }
    }

    /// Check if repeated picks are allowed
    #[must_use]
    pub const fn allows_repeats(self) -> bool {
        matches!(self, Self::WithReplacement)
    }
}

/// Capacity weight given to generated domains of one level
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightSpec {
    /// Every domain gets this weight
    Fixed(f64),
    /// Each domain gets a weight drawn uniformly from `[min, max]`
    Range([f64; 2]),
}

impl WeightSpec {
    /// Check the weight is finite and non-negative, and the range ordered
    pub fn validate(&self, label: &str) -> Result<()> {
        match *self {
            Self::Fixed(w) if !w.is_finite() || w < 0.0 => Err(Error::invalid_spec(format!(
                "level {label}: weight must be a finite non-negative number, got {w}"
            ))),
            Self::Range([min, max]) if !min.is_finite() || !max.is_finite() || min < 0.0 => {
                Err(Error::invalid_spec(format!(
                    "level {label}: weight range [{min}, {max}] must be finite and non-negative"
                )))
            }
            Self::Range([min, max]) if min > max => Err(Error::invalid_spec(format!(
                "level {label}: weight range min {min} exceeds max {max}"
            ))),
            _ => Ok(()),
        }
    }
}

fn default_replacement() -> bool {
    true
}

/// Specification of one hierarchy level
///
/// Level 0 describes the children of the root (e.g. racks), the last
/// level describes the leaves (e.g. drives).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    /// Label used to name generated domains (e.g. "Rack")
    pub label: String,
    /// Children generated per parent; unused for explicit trees
    #[serde(default)]
    pub count: usize,
    /// Weight policy; `None` leaves the weight to aggregation
    #[serde(default)]
    pub weight: Option<WeightSpec>,
    /// Width of the identifier bit range this level samples from
    pub bits: u32,
    /// `true` if fragments of one object may share a domain at this level
    #[serde(default = "default_replacement")]
    pub replacement: bool,
}

impl LevelSpec {
    /// Create a level with replacement and no weight policy
    pub fn new(label: impl Into<String>, count: usize, bits: u32) -> Self {
        Self {
            label: label.into(),
            count,
            weight: None,
            bits,
            replacement: true,
        }
    }

    /// Set the weight policy
    #[must_use]
    pub const fn with_weight(mut self, weight: WeightSpec) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set the replacement policy
    #[must_use]
    pub const fn with_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.replacement = policy.allows_repeats();
        self
    }

    /// Replacement policy applied when sampling this level
    #[must_use]
    pub const fn policy(&self) -> ReplacementPolicy {
        ReplacementPolicy::from_flag(self.replacement)
    }

    /// Validate everything but the child count
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(Error::invalid_spec("level label must not be empty"));
        }
        if self.bits == 0 || self.bits > MAX_LEVEL_BITS {
            return Err(Error::invalid_spec(format!(
                "level {}: bit width must be in 1..={MAX_LEVEL_BITS}, got {}",
                self.label, self.bits
            )));
        }
        if let Some(weight) = &self.weight {
            weight.validate(&self.label)?;
        }
        Ok(())
    }
}

/// Validate a level list against the identifier width
pub fn validate_levels(levels: &[LevelSpec], identifier_bits: u32) -> Result<()> {
    if levels.is_empty() {
        return Err(Error::invalid_spec("at least one level is required"));
    }
    if !is_valid_width(identifier_bits) {
        return Err(Error::invalid_spec(format!(
            "identifier width must be a positive multiple of 4 up to {MAX_IDENTIFIER_BITS}, got {identifier_bits}"
        )));
    }
    for level in levels {
        level.validate()?;
    }
    let used: u64 = levels.iter().map(|l| u64::from(l.bits)).sum();
    if used > u64::from(identifier_bits) {
        return Err(Error::invalid_spec(format!(
            "levels use {used} bits but identifiers are only {identifier_bits} bits wide"
        )));
    }
    Ok(())
}

/// Explicit description of one domain and its subtree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Domain id, unique among its siblings
    pub id: String,
    /// Capacity weight; only meaningful on leaves
    #[serde(default)]
    pub weight: Option<f64>,
    /// Child domains, in sampling order
    #[serde(default)]
    pub children: Vec<DomainSpec>,
}

impl DomainSpec {
    /// Create a leaf domain
    pub fn leaf(id: impl Into<String>, weight: Option<f64>) -> Self {
        Self {
            id: id.into(),
            weight,
            children: Vec::new(),
        }
    }

    /// Create a domain holding `children`
    pub fn node(id: impl Into<String>, children: Vec<Self>) -> Self {
        Self {
            id: id.into(),
            weight: None,
            children,
        }
    }
}

/// Ordered domain ids from the first level down to the leaf
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct PlacementPath(Vec<String>);

impl PlacementPath {
    /// Create an empty path
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Append the next domain id
    pub fn push(&mut self, id: impl Into<String>) {
        self.0.push(id.into());
    }

    /// Domain ids, root side first
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Leaf domain (the physical resource), if any
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Number of levels in the path
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the path is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlacementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_id_parse() {
        let id = FragmentId::parse("a3f0c001", 32).unwrap();
        assert_eq!(id.bits(), 32);
        assert_eq!(id.to_hex(), "a3f0c001");

        let prefixed: FragmentId = "0x2342123".parse().unwrap();
        assert_eq!(prefixed.bits(), 28);
        assert_eq!(prefixed.to_hex(), "2342123");

        assert!(FragmentId::parse("a3f0", 32).is_err());
        assert!("xyz0".parse::<FragmentId>().is_err());
        assert!("".parse::<FragmentId>().is_err());
    }

    #[test]
    fn test_fragment_id_extract() {
        // 1010 0011 1111 0000 ...
        let id = FragmentId::parse("a3f0c001", 32).unwrap();
        assert_eq!(id.extract(0, 4), Some(0xa));
        assert_eq!(id.extract(0, 6), Some(0b10_1000));
        assert_eq!(id.extract(6, 14), Some(0b1111_1100));
        assert_eq!(id.extract(28, 32), Some(1));
        assert_eq!(id.extract(0, 32), Some(0xa3f0_c001));
        assert_eq!(id.extract(30, 33), None);
        assert_eq!(id.extract(5, 4), None);
    }

    #[test]
    fn test_fragment_id_odd_digits() {
        let id: FragmentId = "abc".parse().unwrap();
        assert_eq!(id.bits(), 12);
        assert_eq!(id.extract(0, 4), Some(0xa));
        assert_eq!(id.extract(0, 12), Some(0xabc));
        assert_eq!(id.to_string(), "abc");
    }

    #[test]
    fn test_fragment_id_derive() {
        let a = FragmentId::derive("photos/cat.jpg", 0, 32).unwrap();
        let b = FragmentId::derive("photos/cat.jpg", 0, 32).unwrap();
        let c = FragmentId::derive("photos/cat.jpg", 1, 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.bits(), 32);

        let wide = FragmentId::derive("photos/cat.jpg", 0, 160).unwrap();
        assert_eq!(wide.bits(), 160);
        assert!(FragmentId::derive("k", 0, 30).is_err());
    }

    #[test]
    fn test_fragment_id_from_content() {
        let id = FragmentId::from_content(b"hello world", 32).unwrap();
        // sha256("hello world") = b94d27b9...
        assert_eq!(id.to_hex(), "b94d27b9");
        assert!(FragmentId::from_content(b"x", 512).is_err());
    }

    #[test]
    fn test_fragment_id_serde() {
        let id = FragmentId::parse("00ff10aa", 32).unwrap();
        let json = String::from(id.clone());
        assert_eq!(json, "00ff10aa");
        assert_eq!(FragmentId::try_from(json).unwrap(), id);
    }

    #[test]
    fn test_weight_spec_validate() {
        assert!(WeightSpec::Fixed(2.0).validate("Drive").is_ok());
        assert!(WeightSpec::Range([0.2, 1.5]).validate("Drive").is_ok());
        assert!(WeightSpec::Range([1.0, 1.0]).validate("Drive").is_ok());
        assert!(WeightSpec::Range([1.5, 0.2]).validate("Drive").is_err());
        assert!(WeightSpec::Fixed(-1.0).validate("Drive").is_err());
        assert!(WeightSpec::Fixed(f64::NAN).validate("Drive").is_err());
    }

    #[test]
    fn test_validate_levels() {
        let levels = vec![
            LevelSpec::new("Rack", 3, 6),
            LevelSpec::new("Server", 3, 8),
            LevelSpec::new("Drive", 5, 10).with_weight(WeightSpec::Range([0.2, 1.5])),
        ];
        assert!(validate_levels(&levels, 32).is_ok());
        assert!(validate_levels(&levels, 20).is_err());
        assert!(validate_levels(&[], 32).is_err());

        // identifier widths must be whole hex digits within the id limit
        for bits in [30, 300, 0] {
            assert!(matches!(
                validate_levels(&levels, bits),
                Err(Error::InvalidSpec(_))
            ));
        }

        let zero_width = vec![LevelSpec::new("Rack", 3, 0)];
        assert!(matches!(
            validate_levels(&zero_width, 32),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_level_policy() {
        let level = LevelSpec::new("Server", 3, 8).with_policy(ReplacementPolicy::WithoutReplacement);
        assert!(!level.replacement);
        assert_eq!(level.policy(), ReplacementPolicy::WithoutReplacement);
        assert!(LevelSpec::new("Rack", 3, 6).policy().allows_repeats());
    }

    #[test]
    fn test_placement_path_display() {
        let mut path = PlacementPath::new();
        path.push("Rack3");
        path.push("Server3-2");
        path.push("Drive3-2-4");
        assert_eq!(path.to_string(), "Rack3/Server3-2/Drive3-2-4");
        assert_eq!(path.leaf(), Some("Drive3-2-4"));
        assert_eq!(path.len(), 3);

        let segments: Vec<String> = path.into();
        assert_eq!(segments[0], "Rack3");
    }
}
