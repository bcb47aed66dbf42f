//! Identifier bit ranges per hierarchy level
//!
//! Each level samples from its own contiguous slice of the fragment
//! identifier. Ranges are assigned in depth order starting at bit 0 (the
//! most significant bit), never overlap, and together fit in the
//! identifier width.

use dispersal_common::{Error, FragmentId, LevelSpec, MAX_LEVEL_BITS, Result};
use serde::{Deserialize, Serialize};

/// Half-open bit range `[start, end)` within an identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitRange {
    /// First bit (inclusive)
    pub start: u32,
    /// Last bit (exclusive)
    pub end: u32,
}

impl BitRange {
    /// Number of bits in the range
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.end - self.start
    }

    /// Sampling resolution of the range, `2^width`
    #[must_use]
    pub const fn max_value(&self) -> u64 {
        1u64 << self.width()
    }
}

/// Assignment of bit ranges to levels
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitLayout {
    identifier_bits: u32,
    ranges: Vec<BitRange>,
}

impl BitLayout {
    /// Lay out `widths` back to back within an identifier of `identifier_bits`
    pub fn new(widths: impl IntoIterator<Item = u32>, identifier_bits: u32) -> Result<Self> {
        let mut ranges = Vec::new();
        let mut start = 0u32;
        for (level, width) in widths.into_iter().enumerate() {
            if width == 0 || width > MAX_LEVEL_BITS {
                return Err(Error::invalid_spec(format!(
                    "level {level}: bit width must be in 1..={MAX_LEVEL_BITS}, got {width}"
                )));
            }
            let end = start
                .checked_add(width)
                .filter(|end| *end <= identifier_bits)
                .ok_or_else(|| {
                    Error::invalid_spec(format!(
                        "level {level}: bit range overflows the {identifier_bits}-bit identifier"
                    ))
                })?;
            ranges.push(BitRange { start, end });
            start = end;
        }
        Ok(Self {
            identifier_bits,
            ranges,
        })
    }

    /// Lay out the bit widths of a level list
    pub fn from_levels(levels: &[LevelSpec], identifier_bits: u32) -> Result<Self> {
        Self::new(levels.iter().map(|l| l.bits), identifier_bits)
    }

    /// Identifier width the layout was built for
    #[must_use]
    pub const fn identifier_bits(&self) -> u32 {
        self.identifier_bits
    }

    /// Number of levels
    #[must_use]
    pub fn levels(&self) -> usize {
        self.ranges.len()
    }

    /// Bits consumed by all levels
    #[must_use]
    pub fn used_bits(&self) -> u32 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Bit range owned by `level`
    #[must_use]
    pub fn range(&self, level: usize) -> Option<BitRange> {
        self.ranges.get(level).copied()
    }

    /// Raw draw value of `level` for an identifier, in `[0, 2^width)`
    pub fn slice(&self, id: &FragmentId, level: usize) -> Result<u64> {
        if id.bits() != self.identifier_bits {
            return Err(Error::invalid_identifier(format!(
                "{id}: expected a {}-bit identifier, got {} bits",
                self.identifier_bits,
                id.bits()
            )));
        }
        let range = self
            .range(level)
            .ok_or_else(|| Error::invalid_spec(format!("no bit range for level {level}")))?;
        id.extract(range.start, range.end).ok_or_else(|| {
            Error::invalid_identifier(format!(
                "{id}: cannot read bits {}..{}",
                range.start, range.end
            ))
        })
    }
}
