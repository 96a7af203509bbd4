//! In-process transport: every rank is a thread, every ordered rank pair a rendezvous channel.

use std::cell::Cell;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use log::debug;

use super::{validate_rank, Communicator, Tag};
use crate::error::{MatvecError, Result};

struct Envelope {
    tag: Tag,
    payload: Vec<u8>,
}

/// One rank's view of a [`LocalWorld`].
pub struct LocalEndpoint {
    rank: i32,
    size: i32,
    // outboxes[dest] carries messages from this rank to `dest`
    outboxes: Vec<SyncSender<Envelope>>,
    // inboxes[source] carries messages from `source` to this rank
    inboxes: Vec<Receiver<Envelope>>,
    sent: Cell<usize>,
}

impl LocalEndpoint {
    /// Number of messages this endpoint has sent so far.
    pub fn messages_sent(&self) -> usize {
        self.sent.get()
    }
}

impl Communicator for LocalEndpoint {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    fn send_bytes(&self, bytes: &[u8], dest: i32, tag: Tag) -> Result<()> {
        validate_rank(dest, self.size)?;
        if dest == self.rank {
            return Err(MatvecError::CommunicationError(format!(
                "rank {} cannot send to itself",
                self.rank
            )));
        }

        debug!("Rank {} sending {} to rank {}", self.rank, tag, dest);
        self.outboxes[dest as usize]
            .send(Envelope {
                tag,
                payload: bytes.to_vec(),
            })
            .map_err(|_| {
                MatvecError::CommunicationError(format!("rank {} is no longer receiving", dest))
            })?;
        self.sent.set(self.sent.get() + 1);
        Ok(())
    }

    fn recv_bytes(&self, source: i32, tag: Tag) -> Result<Vec<u8>> {
        validate_rank(source, self.size)?;

        debug!("Rank {} receiving {} from rank {}", self.rank, tag, source);
        let envelope = self.inboxes[source as usize].recv().map_err(|_| {
            MatvecError::CommunicationError(format!("rank {} hung up", source))
        })?;
        if envelope.tag != tag {
            return Err(MatvecError::UnexpectedTag {
                source_rank: source,
                expected: tag,
                found: envelope.tag,
            });
        }
        Ok(envelope.payload)
    }
}

/// A group of ranks running as threads of the current process.
///
/// # Examples
///
/// ```rust,no_run
/// use ring_matvec::comm::{Communicator, LocalWorld};
///
/// let ranks = LocalWorld::run(4, |comm| Ok(comm.rank())).unwrap();
/// assert_eq!(ranks, vec![0, 1, 2, 3]);
/// ```
pub struct LocalWorld;

impl LocalWorld {
    /// Fully connected endpoints for `size` ranks, in rank order.
    pub fn endpoints(size: i32) -> Result<Vec<LocalEndpoint>> {
        if size <= 0 {
            return Err(MatvecError::InitError("Size must be positive".into()));
        }
        let n = size as usize;

        let mut outboxes: Vec<Vec<SyncSender<Envelope>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut inboxes: Vec<Vec<Receiver<Envelope>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = sync_channel(0);
                outboxes[src].push(tx);
                inboxes[dst].push(rx);
            }
        }

        Ok(outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| LocalEndpoint {
                rank: rank as i32,
                size,
                outboxes,
                inboxes,
                sent: Cell::new(0),
            })
            .collect())
    }

    /// Run `f` on `size` ranks concurrently and collect their results in rank order.
    ///
    /// When several ranks fail, the error of the lowest failing rank is returned.
    pub fn run<T, F>(size: i32, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&LocalEndpoint) -> Result<T> + Sync,
    {
        let endpoints = Self::endpoints(size)?;
        let f = &f;

        let outcomes: Vec<Result<T>> = thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|endpoint| scope.spawn(move || f(&endpoint)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(MatvecError::ProcessError("rank thread panicked".into()))
                    })
                })
                .collect()
        });

        outcomes.into_iter().collect()
    }
}
