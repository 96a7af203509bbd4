//! Tagged point-to-point messaging between ranks.
//!
//! Every message travels in an envelope identified by its sender, its receiver and a [`Tag`]
//! naming the kind of payload. Two transports implement [`Communicator`]:
//!
//! - [`World`]: one OS process per rank, messages exchanged through POSIX shared memory.
//! - [`LocalWorld`]: one thread per rank inside the current process, used by tests and demos.
//!
//! Sends block until the receiver has taken the message; receives block until a message from the
//! expected sender is available. A receive that finds a message of another kind fails with
//! [`MatvecError::UnexpectedTag`] rather than waiting forever.

pub mod local;
pub mod shm;

use std::fmt;

use bytemuck::Pod;
use log::debug;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{MatvecError, Result};

pub use local::{LocalEndpoint, LocalWorld};
pub use shm::World;

/// Kind of payload carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Number of rows (and columns) of the square matrix.
    MatrixSize,
    /// Cumulative scalar products computed upstream.
    Results,
    /// The column vector.
    Vector,
    /// One matrix row, numbered by its position within the rows being forwarded.
    Row(usize),
    /// Complete result vector returned to rank 0.
    FinalResults,
    BarrierArrive,
    BarrierComplete,
}

impl Tag {
    /// Wire representation of the tag.
    pub fn code(self) -> i32 {
        match self {
            Tag::MatrixSize => 0,
            Tag::Results => 1,
            Tag::Vector => 2,
            Tag::Row(offset) => 3 + offset as i32,
            Tag::BarrierArrive => -1,
            Tag::BarrierComplete => -2,
            Tag::FinalResults => -3,
        }
    }

    pub fn from_code(code: i32) -> Option<Tag> {
        match code {
            0 => Some(Tag::MatrixSize),
            1 => Some(Tag::Results),
            2 => Some(Tag::Vector),
            -1 => Some(Tag::BarrierArrive),
            -2 => Some(Tag::BarrierComplete),
            -3 => Some(Tag::FinalResults),
            c if c >= 3 => Some(Tag::Row((c - 3) as usize)),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Row(offset) => write!(f, "row #{} (tag {})", offset, self.code()),
            other => write!(f, "{:?} (tag {})", other, other.code()),
        }
    }
}

/// Fails with [`MatvecError::InvalidRank`] unless `rank` addresses a member of a world of `size`.
pub fn validate_rank(rank: i32, size: i32) -> Result<()> {
    if rank < 0 || rank >= size {
        return Err(MatvecError::InvalidRank(rank));
    }
    Ok(())
}

/// A group of ranks able to exchange tagged messages.
///
/// Implementors only provide raw byte transfer; typed sends and receives, along with the barrier,
/// are built on top of it.
///
/// # Examples
///
/// ```rust,no_run
/// use ring_matvec::comm::{Communicator, LocalWorld, Tag};
///
/// let received = LocalWorld::run(2, |comm| {
///     if comm.rank() == 0 {
///         comm.send_slice(&[1i32, 2, 3], 1, Tag::Vector)?;
///         Ok(Vec::new())
///     } else {
///         comm.recv_vec::<i32>(0, Tag::Vector, 3)
///     }
/// })
/// .unwrap();
///
/// assert_eq!(received[1], vec![1, 2, 3]);
/// ```
pub trait Communicator {
    /// Rank of the calling process, between 0 and `size() - 1`.
    fn rank(&self) -> i32;

    /// Number of ranks in the group.
    fn size(&self) -> i32;

    /// Send raw bytes to `dest`, blocking until the receiver has taken them.
    fn send_bytes(&self, bytes: &[u8], dest: i32, tag: Tag) -> Result<()>;

    /// Receive raw bytes sent by `source` with `tag`.
    fn recv_bytes(&self, source: i32, tag: Tag) -> Result<Vec<u8>>;

    /// Serialize `data` with bincode and send it.
    fn send<T: Serialize>(&self, data: &T, dest: i32, tag: Tag) -> Result<()> {
        let serialized =
            bincode::serialize(data).map_err(|e| MatvecError::SerializationError(e.to_string()))?;
        self.send_bytes(&serialized, dest, tag)
    }

    /// Receive a bincode-encoded value.
    fn recv<T: DeserializeOwned>(&self, source: i32, tag: Tag) -> Result<T> {
        let bytes = self.recv_bytes(source, tag)?;
        bincode::deserialize(&bytes).map_err(|e| MatvecError::SerializationError(e.to_string()))
    }

    /// Send a buffer of plain values as their in-memory bytes.
    fn send_slice<T: Pod>(&self, data: &[T], dest: i32, tag: Tag) -> Result<()> {
        self.send_bytes(bytemuck::cast_slice(data), dest, tag)
    }

    /// Receive exactly `len` plain values sent with [`Communicator::send_slice`].
    fn recv_vec<T: Pod>(&self, source: i32, tag: Tag, len: usize) -> Result<Vec<T>> {
        let bytes = self.recv_bytes(source, tag)?;
        let item = std::mem::size_of::<T>();
        if bytes.len() != len * item {
            return Err(MatvecError::CommunicationError(format!(
                "expected {} values ({} bytes) with {} from rank {}, got {} bytes",
                len,
                len * item,
                tag,
                source,
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(item)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> Result<()> {
        debug!("Rank {} entering barrier", self.rank());

        // First phase: everyone reports to root
        if self.rank() == 0 {
            for rank in 1..self.size() {
                self.recv_bytes(rank, Tag::BarrierArrive)?;
            }
        } else {
            self.send_bytes(&[], 0, Tag::BarrierArrive)?;
        }

        // Second phase: root releases everyone
        if self.rank() == 0 {
            for rank in 1..self.size() {
                self.send_bytes(&[], rank, Tag::BarrierComplete)?;
            }
        } else {
            self.recv_bytes(0, Tag::BarrierComplete)?;
        }

        debug!("Rank {} exiting barrier", self.rank());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_codes_match_the_wire_layout() {
        assert_eq!(Tag::MatrixSize.code(), 0);
        assert_eq!(Tag::Results.code(), 1);
        assert_eq!(Tag::Vector.code(), 2);
        assert_eq!(Tag::Row(0).code(), 3);
        assert_eq!(Tag::Row(5).code(), 8);
        assert_eq!(Tag::FinalResults.code(), -3);
    }

    #[test]
    fn tag_codes_decode_back() {
        for tag in [
            Tag::MatrixSize,
            Tag::Results,
            Tag::Vector,
            Tag::Row(0),
            Tag::Row(41),
            Tag::FinalResults,
            Tag::BarrierArrive,
            Tag::BarrierComplete,
        ] {
            assert_eq!(Tag::from_code(tag.code()), Some(tag));
        }
        assert_eq!(Tag::from_code(-7), None);
    }

    #[test]
    fn rank_validation() {
        assert!(validate_rank(0, 1).is_ok());
        assert!(validate_rank(3, 4).is_ok());
        assert!(matches!(validate_rank(4, 4), Err(MatvecError::InvalidRank(4))));
        assert!(matches!(validate_rank(-1, 4), Err(MatvecError::InvalidRank(-1))));
    }
}
