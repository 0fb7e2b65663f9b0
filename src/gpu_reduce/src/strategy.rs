//! Reduction strategies.
//!
//! Each strategy pairs one device kernel with the host-side schedule that
//! drives it from `N` elements down to one. The kernel name and the schedule
//! are both looked up from the [`Strategy`] variant, so there is no separate
//! table that has to be kept in the same order as the enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schedule::PassSchedule;

/// Reduction algorithm executed over the same input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// In-place tree with a doubling stride (1, 2, 4, ...).
    ///
    /// Active threads touch addresses `2 * stride` apart, so accesses are
    /// not coalesced and warps diverge as the tree thins out.
    InterleavedAddressing,
    /// In-place tree with a halving stride (N/2, N/4, ..., 1).
    ///
    /// Active threads are the contiguous low indices.
    SequentialAddressing,
    /// Out-of-place, one partial sum per work group via scratch memory.
    Decomposition,
    /// [`Strategy::Decomposition`] with a multi-element load per thread and
    /// a warp-synchronous tail.
    DecompositionUnrolled,
}

impl Strategy {
    /// All strategies in execution order.
    pub const ALL: [Strategy; 4] = [
        Strategy::InterleavedAddressing,
        Strategy::SequentialAddressing,
        Strategy::Decomposition,
        Strategy::DecompositionUnrolled,
    ];

    /// Entry point of the device kernel implementing this strategy.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Strategy::InterleavedAddressing => "reduction_interleaved_addressing",
            Strategy::SequentialAddressing => "reduction_sequential_addressing",
            Strategy::Decomposition => "reduction_decomposition",
            Strategy::DecompositionUnrolled => "reduction_decomposition_unrolled",
        }
    }

    /// Short human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Strategy::InterleavedAddressing => "interleaved",
            Strategy::SequentialAddressing => "sequential",
            Strategy::Decomposition => "decomposition",
            Strategy::DecompositionUnrolled => "decomposition-unrolled",
        }
    }

    /// Whether passes read one buffer and write the other.
    ///
    /// Out-of-place strategies swap the buffer pair after every pass;
    /// in-place strategies never do.
    pub fn is_out_of_place(self) -> bool {
        matches!(
            self,
            Strategy::Decomposition | Strategy::DecompositionUnrolled
        )
    }

    /// Pass schedule reducing `len` elements with work groups of at most
    /// `base_group_size` threads.
    pub fn schedule(self, len: usize, base_group_size: usize) -> PassSchedule {
        PassSchedule::new(self, len, base_group_size)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "interleaved" | "interleaved-addressing" => Ok(Strategy::InterleavedAddressing),
            "sequential" | "sequential-addressing" => Ok(Strategy::SequentialAddressing),
            "decomposition" | "decomp" => Ok(Strategy::Decomposition),
            "decomposition-unrolled" | "decomp-unroll" | "unrolled" => {
                Ok(Strategy::DecompositionUnrolled)
            }
            other => Err(format!("unknown reduction strategy '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_names_unique() {
        let mut names: Vec<_> = Strategy::ALL.iter().map(|s| s.kernel_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Strategy::ALL.len());
    }

    #[test]
    fn test_parse_round_trips_label() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.label().parse::<Strategy>().unwrap(), strategy);
        }
        assert_eq!(
            "Sequential_Addressing".parse::<Strategy>().unwrap(),
            Strategy::SequentialAddressing
        );
        assert!("tree".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_out_of_place() {
        assert!(!Strategy::InterleavedAddressing.is_out_of_place());
        assert!(!Strategy::SequentialAddressing.is_out_of_place());
        assert!(Strategy::Decomposition.is_out_of_place());
        assert!(Strategy::DecompositionUnrolled.is_out_of_place());
    }
}
