//! Assignment of matrix rows to ranks.
//!
//! Rows are split into contiguous stripes of `matrix_size / process_count` rows, rank `r` owning
//! `[r * stripe_size, (r + 1) * stripe_size)`. How the leftover rows of a non-divisible size are
//! handled is decided by [`RemainderPolicy`].

use std::ops::Range;

use clap::ValueEnum;

use crate::error::{MatvecError, Result};

/// What to do with the `matrix_size % process_count` rows left after even striping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RemainderPolicy {
    /// The last rank computes the leftover rows in addition to its own stripe.
    #[default]
    #[value(name = "last")]
    AssignToLast,
    /// Sizes that do not divide evenly are refused.
    #[value(name = "reject")]
    Reject,
}

/// A contiguous range of global row indices, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowStripe {
    pub start: usize,
    pub end: usize,
}

impl RowStripe {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, row: usize) -> bool {
        self.start <= row && row < self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Everything a rank needs to know about the run once the matrix size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    rank: usize,
    process_count: usize,
    matrix_size: usize,
    stripe_size: usize,
    policy: RemainderPolicy,
}

impl RunContext {
    pub fn new(
        rank: usize,
        process_count: usize,
        matrix_size: usize,
        policy: RemainderPolicy,
    ) -> Result<Self> {
        if process_count == 0 {
            return Err(MatvecError::InvalidConfig("process count must be positive".into()));
        }
        if rank >= process_count {
            return Err(MatvecError::InvalidRank(rank as i32));
        }
        if matrix_size == 0 {
            return Err(MatvecError::InvalidConfig("matrix size must be positive".into()));
        }
        if policy == RemainderPolicy::Reject && matrix_size % process_count != 0 {
            return Err(MatvecError::InvalidConfig(format!(
                "matrix size {} is not a multiple of the process count {}",
                matrix_size, process_count
            )));
        }

        Ok(Self {
            rank,
            process_count,
            matrix_size,
            stripe_size: matrix_size / process_count,
            policy,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn process_count(&self) -> usize {
        self.process_count
    }

    pub fn matrix_size(&self) -> usize {
        self.matrix_size
    }

    /// Rows per rank before any leftover is added.
    pub fn stripe_size(&self) -> usize {
        self.stripe_size
    }

    pub fn policy(&self) -> RemainderPolicy {
        self.policy
    }

    pub fn is_first(&self) -> bool {
        self.rank == 0
    }

    pub fn is_last(&self) -> bool {
        self.rank + 1 == self.process_count
    }

    pub fn predecessor(&self) -> Option<usize> {
        self.rank.checked_sub(1)
    }

    pub fn successor(&self) -> Option<usize> {
        (!self.is_last()).then_some(self.rank + 1)
    }

    /// Rows computed by `rank`.
    pub fn stripe_of(&self, rank: usize) -> RowStripe {
        let start = rank * self.stripe_size;
        let end = if rank + 1 == self.process_count {
            self.matrix_size
        } else {
            start + self.stripe_size
        };
        RowStripe { start, end }
    }

    pub fn own_stripe(&self) -> RowStripe {
        self.stripe_of(self.rank)
    }

    /// Rows this rank holds once its predecessor has forwarded them.
    pub fn rows_held(&self) -> Range<usize> {
        self.own_stripe().start..self.matrix_size
    }

    /// Rows this rank passes on to its successor.
    pub fn rows_forwarded(&self) -> Range<usize> {
        self.own_stripe().end..self.matrix_size
    }
}

/// Stripes of every rank, in rank order.
pub fn partition(
    matrix_size: usize,
    process_count: usize,
    policy: RemainderPolicy,
) -> Result<Vec<RowStripe>> {
    let context = RunContext::new(0, process_count, matrix_size, policy)?;
    Ok((0..process_count).map(|rank| context.stripe_of(rank)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers_exactly_once(stripes: &[RowStripe], size: usize) -> bool {
        (0..size).all(|row| stripes.iter().filter(|s| s.contains(row)).count() == 1)
            && stripes.iter().all(|s| s.end <= size)
    }

    #[test]
    fn divisible_sizes_partition_evenly() {
        for processes in [1, 2, 3, 4, 6, 12] {
            let stripes = partition(12, processes, RemainderPolicy::Reject).unwrap();
            assert!(covers_exactly_once(&stripes, 12));
            assert!(stripes.iter().all(|s| s.len() == 12 / processes));
            for pair in stripes.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn leftover_rows_go_to_the_last_rank() {
        let stripes = partition(10, 4, RemainderPolicy::AssignToLast).unwrap();
        assert!(covers_exactly_once(&stripes, 10));
        assert_eq!(stripes[3], RowStripe { start: 6, end: 10 });
        assert_eq!(stripes[0].len(), 2);
    }

    #[test]
    fn more_ranks_than_rows_leaves_intermediate_ranks_idle() {
        let stripes = partition(3, 5, RemainderPolicy::AssignToLast).unwrap();
        assert!(covers_exactly_once(&stripes, 3));
        assert!(stripes[..4].iter().all(RowStripe::is_empty));
        assert_eq!(stripes[4].len(), 3);
    }

    #[test]
    fn reject_policy_refuses_uneven_sizes() {
        let err = partition(10, 4, RemainderPolicy::Reject).unwrap_err();
        assert!(matches!(err, MatvecError::InvalidConfig(_)));
    }

    #[test]
    fn held_and_forwarded_rows_shrink_down_the_chain() {
        let middle = RunContext::new(1, 3, 9, RemainderPolicy::AssignToLast).unwrap();
        assert_eq!(middle.rows_held(), 3..9);
        assert_eq!(middle.rows_forwarded(), 6..9);
        assert_eq!(middle.predecessor(), Some(0));
        assert_eq!(middle.successor(), Some(2));

        let last = RunContext::new(2, 3, 9, RemainderPolicy::AssignToLast).unwrap();
        assert!(last.rows_forwarded().is_empty());
        assert_eq!(last.successor(), None);
    }

    #[test]
    fn single_process_owns_everything() {
        let context = RunContext::new(0, 1, 7, RemainderPolicy::Reject).unwrap();
        assert!(context.is_first() && context.is_last());
        assert_eq!(context.own_stripe(), RowStripe { start: 0, end: 7 });
    }

    #[test]
    fn invalid_contexts() {
        assert!(RunContext::new(0, 0, 4, RemainderPolicy::AssignToLast).is_err());
        assert!(RunContext::new(2, 2, 4, RemainderPolicy::AssignToLast).is_err());
        assert!(RunContext::new(0, 2, 0, RemainderPolicy::AssignToLast).is_err());
    }
}
