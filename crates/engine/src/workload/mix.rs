//! Weighted operation mix
//!
//! A mix prescribes the share of each operation type in a workload and picks
//! the next operation to perform.

use std::collections::HashSet;

use rand::Rng;

/// Mix weights must add up to this total (percentages)
pub const MIX_TOTAL: i64 = 100;

/// Errors raised while building or querying a [`Mix`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MixError {
    /// No weights were configured
    #[error("workload mix count must be greater than zero")]
    Empty,

    /// Weights and tags differ in length
    #[error("workload mix count ({weights}) must equal workload tag count ({tags})")]
    LengthMismatch { weights: usize, tags: usize },

    /// A weight is below zero
    #[error("mix value for tag '{tag}' must be greater than or equal to zero, got {weight}")]
    NegativeWeight { tag: String, weight: i64 },

    /// Weights do not add up to 100
    #[error("workload mix must sum to {MIX_TOTAL}, got {0}")]
    InvalidSum(i64),

    /// A tag is empty or whitespace
    #[error("workload tag at position {0} is blank")]
    BlankTag(usize),

    /// The same tag appears twice
    #[error("duplicate workload tag: {0}")]
    DuplicateTag(String),

    /// Lookup by ordinal failed
    #[error("illegal mix ordinal: {0}")]
    OrdinalNotFound(usize),

    /// Lookup by tag failed
    #[error("no such mix tag found: {0}")]
    TagNotFound(String),
}

/// One operation category in a mix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationType {
    ordinal: usize,
    tag: String,
    weight: u32,
    cumulative_limit: u32,
}

impl OperationType {
    /// Position of this type in declaration order
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Label identifying the operation
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Configured percentage
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Running prefix sum of weights up to and including this type
    pub fn cumulative_limit(&self) -> u32 {
        self.cumulative_limit
    }

    fn is_reachable(&self) -> bool {
        self.weight > 0 && self.cumulative_limit > 0
    }
}

/// Weighted categorical distribution over operation tags
///
/// Built once from two parallel arrays and never mutated afterwards, so one
/// instance can be shared by every worker. Draws take the caller's RNG; each
/// worker owns its own generator and the mix itself holds no draw state.
///
/// # Example
///
/// ```
/// use dash_engine::workload::Mix;
///
/// let mix = Mix::new(&[70, 30], &["READ", "WRITE"]).unwrap();
/// let picked = mix.next();
/// assert!(picked.tag() == "READ" || picked.tag() == "WRITE");
/// ```
#[derive(Debug, Clone)]
pub struct Mix {
    types: Vec<OperationType>,
}

impl Mix {
    /// Build a mix from percentage weights and their tags
    pub fn new<S: AsRef<str>>(weights: &[i64], tags: &[S]) -> Result<Self, MixError> {
        if weights.is_empty() || tags.is_empty() {
            return Err(MixError::Empty);
        }
        if weights.len() != tags.len() {
            return Err(MixError::LengthMismatch {
                weights: weights.len(),
                tags: tags.len(),
            });
        }

        let mut seen = HashSet::with_capacity(tags.len());
        for (position, (weight, tag)) in weights.iter().zip(tags).enumerate() {
            let tag = tag.as_ref();
            if tag.trim().is_empty() {
                return Err(MixError::BlankTag(position));
            }
            if *weight < 0 {
                return Err(MixError::NegativeWeight {
                    tag: tag.to_string(),
                    weight: *weight,
                });
            }
            if !seen.insert(tag) {
                return Err(MixError::DuplicateTag(tag.to_string()));
            }
        }

        let sum = weights.iter().fold(0i64, |sum, w| sum.saturating_add(*w));
        if sum != MIX_TOTAL {
            return Err(MixError::InvalidSum(sum));
        }

        let mut cumulative = 0u32;
        let types = weights
            .iter()
            .zip(tags)
            .enumerate()
            .map(|(ordinal, (weight, tag))| {
                // bounded by MIX_TOTAL, checked above
                let weight = *weight as u32;
                cumulative += weight;
                OperationType {
                    ordinal,
                    tag: tag.as_ref().to_string(),
                    weight,
                    cumulative_limit: cumulative,
                }
            })
            .collect();

        Ok(Self { types })
    }

    /// Pick the next operation type using the thread-local generator
    pub fn next(&self) -> &OperationType {
        self.pick(&mut rand::thread_rng())
    }

    /// Pick the next operation type with the given generator
    ///
    /// Draws a uniform integer in `[0, 100]` and returns the first reachable
    /// type whose cumulative limit is at least the draw.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &OperationType {
        let quantum = rng.gen_range(0..=MIX_TOTAL as u32);
        self.types
            .iter()
            .find(|t| t.is_reachable() && quantum <= t.cumulative_limit)
            // The last reachable type always has a limit of 100
            .unwrap_or_else(|| self.last_reachable())
    }

    fn last_reachable(&self) -> &OperationType {
        self.types
            .iter()
            .rev()
            .find(|t| t.is_reachable())
            .unwrap_or(&self.types[self.types.len() - 1])
    }

    /// Look up a type by ordinal
    pub fn get_type(&self, ordinal: usize) -> Result<&OperationType, MixError> {
        self.types
            .get(ordinal)
            .ok_or(MixError::OrdinalNotFound(ordinal))
    }

    /// Look up a type by tag
    pub fn get_type_by_tag(&self, tag: &str) -> Result<&OperationType, MixError> {
        self.types
            .iter()
            .find(|t| t.tag == tag)
            .ok_or_else(|| MixError::TagNotFound(tag.to_string()))
    }

    /// All configured types in declaration order
    pub fn iter(&self) -> std::slice::Iter<'_, OperationType> {
        self.types.iter()
    }

    /// Number of configured types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Always false for a constructed mix
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Configured tags in declaration order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.tag.as_str())
    }
}

impl<'a> IntoIterator for &'a Mix {
    type Item = &'a OperationType;
    type IntoIter = std::slice::Iter<'a, OperationType>;

    fn into_iter(self) -> Self::IntoIter {
        self.types.iter()
    }
}
