//! Weighted draw of child domains
//!
//! Turns raw draw values (identifier bit slices) into child indices of a
//! [`Distribution`]. With replacement, each value is looked up on the cdf
//! independently. Without replacement, each pick removes its bucket from a
//! per-call working copy of the pdf so a batch never repeats a child.

use crate::topology::Distribution;
use dispersal_common::ReplacementPolicy;
use thiserror::Error;

/// Sampling failure, converted to the common error by the driver
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SampleError {
    /// The distribution has no mass (all children weigh zero)
    #[error("distribution has no capacity")]
    NoCapacity,

    /// More distinct picks requested than there are children
    #[error("insufficient distinct targets: have {available}, need {required}")]
    InsufficientTargets { available: usize, required: usize },

    /// No bucket absorbed the draw value
    #[error("draw value {value} not absorbed by any bucket")]
    Underflow { value: u64 },
}

/// Draws child indices from one distribution
#[derive(Clone, Copy, Debug)]
pub struct WeightedSampler<'a> {
    distribution: &'a Distribution,
}

impl<'a> WeightedSampler<'a> {
    /// Create a sampler over `distribution`
    #[must_use]
    pub const fn new(distribution: &'a Distribution) -> Self {
        Self { distribution }
    }

    /// Draw one child index per value, in input order
    pub fn draw(
        &self,
        policy: ReplacementPolicy,
        values: &[u64],
    ) -> Result<Vec<usize>, SampleError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        if self.distribution.is_empty() {
            return Err(SampleError::NoCapacity);
        }
        match policy {
            ReplacementPolicy::WithReplacement => self.draw_with_replacement(values),
            ReplacementPolicy::WithoutReplacement => self.draw_without_replacement(values),
        }
    }

    /// First bucket whose cdf reaches `v`; zero-mass buckets never match
    fn draw_with_replacement(&self, values: &[u64]) -> Result<Vec<usize>, SampleError> {
        let Distribution { pdf, cdf, .. } = self.distribution;
        values
            .iter()
            .map(|&value| {
                cdf.iter()
                    .zip(pdf)
                    .position(|(&c, &p)| p > 0 && c >= value)
                    .ok_or(SampleError::Underflow { value })
            })
            .collect()
    }

    /// Sequential subtraction over the buckets still present
    ///
    /// Each raw value is reduced modulo the mass not yet drawn in this
    /// batch, measured on the full pdf scale. The first present bucket
    /// whose weight covers the remaining value wins and is removed.
    fn draw_without_replacement(&self, values: &[u64]) -> Result<Vec<usize>, SampleError> {
        let Distribution { pdf, max_value, .. } = self.distribution;
        if pdf.len() < values.len() {
            return Err(SampleError::InsufficientTargets {
                available: pdf.len(),
                required: values.len(),
            });
        }

        let mut working: Vec<Option<u64>> = pdf.iter().copied().map(Some).collect();
        let mut drawn_sum = 0u64;
        let mut picks = Vec::with_capacity(values.len());

        for &raw in values {
            let remaining = max_value.saturating_sub(drawn_sum);
            if remaining == 0 {
                return Err(SampleError::NoCapacity);
            }
            let mut value = raw % remaining;

            let mut landing = None;
            for (index, slot) in working.iter().enumerate() {
                let Some(weight) = *slot else { continue };
                if weight > 0 && value <= weight {
                    landing = Some(index);
                    break;
                }
                value -= weight;
            }

            let index = landing.ok_or(SampleError::Underflow { value: raw })?;
            drawn_sum += working[index].take().unwrap_or(0);
            picks.push(index);
        }

        Ok(picks)
    }
}
