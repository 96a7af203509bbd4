//! Multi-process transport over POSIX shared memory.
//!
//! Rank 0 creates one shared segment holding a `SharedState` block followed by one message slot
//! per ordered (sender, receiver) pair, then re-executes the current program `size - 1` times.
//! The copies find the segment through an environment variable, claim a rank, and wait until
//! every rank is present.
//!
//! A slot carries at most one message at a time: the sender waits for the slot to be free, writes
//! the payload, raises `valid` and then waits for the receiver to raise `received`.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use log::{debug, warn};
use shared_memory::{Shmem, ShmemConf};

use super::{validate_rank, Communicator, Tag};
use crate::error::{MatvecError, Result};

/// Largest payload a single message may carry.
pub const MAX_MSG_SIZE: usize = 64 * 1024;
/// Largest number of ranks a world may hold.
pub const MAX_RANKS: usize = 32;

const HEADER_SIZE: usize = std::mem::size_of::<MessageHeader>();
const SLOT_SIZE: usize = HEADER_SIZE + MAX_MSG_SIZE;
const STATE_SIZE: usize = std::mem::size_of::<SharedState>();
const SPAWNED_ENV: &str = "RING_MATVEC_SHM";

#[repr(C)]
struct MessageHeader {
    valid: AtomicBool,
    received: AtomicBool,
    tag: AtomicI32,
    source: AtomicI32,
    size: AtomicUsize,
}

impl MessageHeader {
    fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            received: AtomicBool::new(false),
            tag: AtomicI32::new(0),
            source: AtomicI32::new(-1),
            size: AtomicUsize::new(0),
        }
    }
}

#[repr(C)]
struct SharedState {
    size: AtomicUsize,
    process_ids: [AtomicUsize; MAX_RANKS], // Process IDs for each rank
    init_flags: [AtomicBool; MAX_RANKS],
    aborted: AtomicBool,
    aborted_by: AtomicI32,
}

/// Byte offset of the slot carrying messages from `src` to `dst`.
fn slot_offset(src: usize, dst: usize, size: usize) -> usize {
    STATE_SIZE + (src * size + dst) * SLOT_SIZE
}

fn segment_size(size: usize) -> usize {
    STATE_SIZE + size * size * SLOT_SIZE
}

fn relax() {
    std::hint::spin_loop();
    std::thread::yield_now();
}

/// The process group of a multi-process run.
///
/// # Examples
///
/// ```rust,no_run
/// use ring_matvec::comm::{Communicator, Tag, World};
///
/// let world = World::init(2).unwrap();
///
/// if world.rank() == 0 {
///     world.send(&8u64, 1, Tag::MatrixSize).unwrap();
/// } else {
///     let size: u64 = world.recv(0, Tag::MatrixSize).unwrap();
///     println!("Received: {}", size);
/// }
///
/// world.finalize().unwrap();
/// ```
pub struct World {
    rank: i32,
    size: i32,
    shmem: Shmem,
    children: Vec<Child>,
}

impl World {
    /// Whether the current process was started by rank 0 of a running world.
    pub fn is_spawned() -> bool {
        std::env::var_os(SPAWNED_ENV).is_some()
    }

    /// Create the world, or join it when the current process was spawned by rank 0.
    ///
    /// Rank 0 starts `size - 1` copies of the current executable with the same arguments and
    /// blocks until all of them have joined.
    pub fn init(size: i32) -> Result<Self> {
        if size <= 0 || size as usize > MAX_RANKS {
            return Err(MatvecError::InitError(format!(
                "Size must be between 1 and {}, got {}",
                MAX_RANKS, size
            )));
        }

        if let Some(link) = std::env::var_os(SPAWNED_ENV) {
            return Self::init_spawned(size, PathBuf::from(link));
        }

        debug!("Initializing world with {} processes", size);

        let link = std::env::temp_dir().join(format!("ring_matvec_{}", std::process::id()));
        let total_size = segment_size(size as usize);
        debug!("Creating shared memory of size {} at {}", total_size, link.display());

        let shmem = ShmemConf::new()
            .size(total_size)
            .flink(&link)
            .create()
            .map_err(|e| MatvecError::SharedMemoryError(e.to_string()))?;

        let mut world = World {
            rank: 0,
            size,
            shmem,
            children: Vec::with_capacity(size as usize - 1),
        };

        world.prepare_segment();
        world.state().process_ids[0].store(std::process::id() as usize, Ordering::SeqCst);
        world.state().init_flags[0].store(true, Ordering::SeqCst);

        let exe = std::env::current_exe().map_err(|e| MatvecError::ProcessError(e.to_string()))?;
        for _ in 1..size {
            let child = Command::new(&exe)
                .args(std::env::args_os().skip(1))
                .env(SPAWNED_ENV, &link)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| MatvecError::ProcessError(e.to_string()))?;
            world.children.push(child);
        }

        debug!("Parent process initialized as rank 0");
        world.wait_for_all_ranks()?;
        Ok(world)
    }

    /// Reset the shared state and every slot header of a freshly created segment.
    fn prepare_segment(&self) {
        let state = self.state();
        state.size.store(self.size as usize, Ordering::SeqCst);
        state.aborted.store(false, Ordering::SeqCst);
        state.aborted_by.store(-1, Ordering::SeqCst);
        for i in 0..MAX_RANKS {
            state.process_ids[i].store(0, Ordering::SeqCst);
            state.init_flags[i].store(false, Ordering::SeqCst);
        }

        let size = self.size as usize;
        for src in 0..size {
            for dst in 0..size {
                // SAFETY: the slot lies inside the segment sized by `segment_size`.
                unsafe {
                    let header_ptr =
                        self.shmem.as_ptr().add(slot_offset(src, dst, size)) as *mut MessageHeader;
                    std::ptr::write(header_ptr, MessageHeader::new());
                }
            }
        }
    }

    fn init_spawned(size: i32, link: PathBuf) -> Result<Self> {
        debug!("Spawned process joining world at {}", link.display());

        let shmem = ShmemConf::new()
            .flink(&link)
            .open()
            .map_err(|e| MatvecError::SharedMemoryError(e.to_string()))?;

        let mut world = World {
            rank: -1,
            size,
            shmem,
            children: Vec::new(),
        };

        let shared_size = world.state().size.load(Ordering::SeqCst);
        if shared_size != size as usize {
            return Err(MatvecError::InitError(format!(
                "world was created for {} processes, not {}",
                shared_size, size
            )));
        }

        // Claim the first free rank by swapping our process ID into its slot
        let pid = std::process::id() as usize;
        let claimed = (1..size).find(|&i| {
            world.state().process_ids[i as usize]
                .compare_exchange(0, pid, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        });
        world.rank = claimed.ok_or_else(|| {
            MatvecError::InitError(format!("No available ranks for process {}", pid))
        })?;
        debug!("Process {} initialized as rank {}", pid, world.rank);

        world.state().init_flags[world.rank as usize].store(true, Ordering::SeqCst);
        world.wait_for_all_ranks()?;
        Ok(world)
    }

    fn wait_for_all_ranks(&mut self) -> Result<()> {
        loop {
            let state = self.state();
            if (0..self.size as usize).all(|i| state.init_flags[i].load(Ordering::SeqCst)) {
                return Ok(());
            }
            self.check_aborted()?;
            // A child that dies before joining would leave everyone waiting
            for child in &mut self.children {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(MatvecError::ProcessError(format!(
                        "process {} exited with {} before joining",
                        child.id(),
                        status
                    )));
                }
            }
            relax();
        }
    }

    fn state(&self) -> &SharedState {
        // SAFETY: the segment starts with a `SharedState` made only of atomics.
        unsafe { &*(self.shmem.as_ptr() as *const SharedState) }
    }

    fn header(&self, src: i32, dst: i32) -> &MessageHeader {
        // SAFETY: both ranks were validated, so the slot lies inside the segment.
        unsafe {
            &*(self
                .shmem
                .as_ptr()
                .add(slot_offset(src as usize, dst as usize, self.size as usize))
                as *const MessageHeader)
        }
    }

    fn payload_ptr(&self, src: i32, dst: i32) -> *mut u8 {
        // SAFETY: as in `header`; the payload follows the header within the slot.
        unsafe {
            self.shmem
                .as_ptr()
                .add(slot_offset(src as usize, dst as usize, self.size as usize) + HEADER_SIZE)
        }
    }

    fn check_aborted(&self) -> Result<()> {
        let state = self.state();
        if state.aborted.load(Ordering::SeqCst) {
            return Err(MatvecError::CommunicationError(format!(
                "run aborted by rank {}",
                state.aborted_by.load(Ordering::SeqCst)
            )));
        }
        Ok(())
    }

    /// Tell every rank to give up, then release this process's share of the world.
    ///
    /// Ranks blocked in a send or receive return an error instead of waiting for a peer that
    /// will never answer. Rank 0 reaps its children before returning.
    pub fn abort(mut self) {
        let state = self.state();
        if !state.aborted.swap(true, Ordering::SeqCst) {
            state.aborted_by.store(self.rank, Ordering::SeqCst);
            warn!("Rank {} aborting the run", self.rank);
        }
        for child in &mut self.children {
            if let Err(e) = child.wait() {
                warn!("Failed to wait for process {}: {}", child.id(), e);
            }
        }
    }

    /// Synchronize shutdown: all ranks meet in a barrier, then rank 0 waits for its children.
    ///
    /// Fails if any child process exited unsuccessfully.
    pub fn finalize(mut self) -> Result<()> {
        self.barrier()?;

        let mut failed = Vec::new();
        for child in &mut self.children {
            let status = child
                .wait()
                .map_err(|e| MatvecError::ProcessError(e.to_string()))?;
            if !status.success() {
                failed.push(format!("process {} exited with {}", child.id(), status));
            }
        }

        debug!("Process {} finished", self.rank);
        if failed.is_empty() {
            Ok(())
        } else {
            Err(MatvecError::ProcessError(failed.join(", ")))
        }
    }
}

impl Communicator for World {
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
        if bytes.len() > MAX_MSG_SIZE {
            return Err(MatvecError::CommunicationError(format!(
                "Message too large ({} bytes, at most {})",
                bytes.len(),
                MAX_MSG_SIZE
            )));
        }

        debug!("Rank {} sending {} to rank {}", self.rank, tag, dest);

        let header = self.header(self.rank, dest);

        // Wait for slot to be free
        while header.valid.load(Ordering::SeqCst) {
            self.check_aborted()?;
            relax();
        }

        header.tag.store(tag.code(), Ordering::SeqCst);
        header.source.store(self.rank, Ordering::SeqCst);
        header.size.store(bytes.len(), Ordering::SeqCst);
        header.received.store(false, Ordering::SeqCst);
        // SAFETY: the payload area holds MAX_MSG_SIZE bytes and nobody reads it until `valid`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.payload_ptr(self.rank, dest),
                bytes.len(),
            );
        }
        header.valid.store(true, Ordering::SeqCst);

        debug!("Rank {} waiting for acknowledgment from rank {}", self.rank, dest);
        while !header.received.load(Ordering::SeqCst) {
            self.check_aborted()?;
            relax();
        }

        debug!("Rank {} completed send to rank {}", self.rank, dest);
        Ok(())
    }

    fn recv_bytes(&self, source: i32, tag: Tag) -> Result<Vec<u8>> {
        validate_rank(source, self.size)?;

        debug!("Rank {} receiving {} from rank {}", self.rank, tag, source);

        let header = self.header(source, self.rank);
        while !header.valid.load(Ordering::SeqCst) {
            self.check_aborted()?;
            relax();
        }

        let code = header.tag.load(Ordering::SeqCst);
        if code != tag.code() {
            let found = Tag::from_code(code).ok_or_else(|| {
                MatvecError::CommunicationError(format!("unknown tag {} from rank {}", code, source))
            })?;
            return Err(MatvecError::UnexpectedTag {
                source_rank: source,
                expected: tag,
                found,
            });
        }
        let sender = header.source.load(Ordering::SeqCst);
        if sender != source {
            return Err(MatvecError::CommunicationError(format!(
                "slot of rank {} holds a message from rank {}",
                source, sender
            )));
        }

        let size = header.size.load(Ordering::SeqCst);
        // SAFETY: the sender wrote `size` bytes before raising `valid` and waits for `received`.
        let payload =
            unsafe { std::slice::from_raw_parts(self.payload_ptr(source, self.rank), size) }.to_vec();

        // Acknowledge receipt and mark slot as free
        header.received.store(true, Ordering::SeqCst);
        header.valid.store(false, Ordering::SeqCst);

        debug!("Rank {} completed receive from rank {}", self.rank, source);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_do_not_overlap() {
        let size = 3;
        let mut offsets: Vec<usize> = (0..size)
            .flat_map(|src| (0..size).map(move |dst| slot_offset(src, dst, size)))
            .collect();
        offsets.sort_unstable();
        assert_eq!(offsets[0], STATE_SIZE);
        for pair in offsets.windows(2) {
            assert_eq!(pair[1] - pair[0], SLOT_SIZE);
        }
        assert_eq!(offsets[offsets.len() - 1] + SLOT_SIZE, segment_size(size));
    }

    #[test]
    fn header_fits_before_payload() {
        assert!(HEADER_SIZE < SLOT_SIZE);
        assert_eq!(SLOT_SIZE - HEADER_SIZE, MAX_MSG_SIZE);
    }

    /// A world of `size` ranks seen from `rank`, over a private segment with no peer processes.
    fn detached_world(rank: i32, size: i32) -> World {
        let shmem = ShmemConf::new()
            .size(segment_size(size as usize))
            .create()
            .unwrap();
        let world = World {
            rank,
            size,
            shmem,
            children: Vec::new(),
        };
        world.prepare_segment();
        world
    }

    /// Fill the `src -> dst` slot the way a sending rank does.
    fn post(world: &World, src: i32, dst: i32, sender: i32, tag: Tag, bytes: &[u8]) {
        let header = world.header(src, dst);
        header.tag.store(tag.code(), Ordering::SeqCst);
        header.source.store(sender, Ordering::SeqCst);
        header.size.store(bytes.len(), Ordering::SeqCst);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), world.payload_ptr(src, dst), bytes.len());
        }
        header.valid.store(true, Ordering::SeqCst);
    }

    #[test]
    fn posted_message_is_received_and_acknowledged() {
        let world = detached_world(1, 2);
        post(&world, 0, 1, 0, Tag::Vector, &[1, 2, 3]);

        assert_eq!(world.recv_bytes(0, Tag::Vector).unwrap(), vec![1, 2, 3]);
        let header = world.header(0, 1);
        assert!(header.received.load(Ordering::SeqCst));
        assert!(!header.valid.load(Ordering::SeqCst));
    }

    #[test]
    fn typed_payload_survives_the_slot() {
        let world = detached_world(1, 2);
        let results: Vec<i64> = vec![4, -12, 20];
        post(&world, 0, 1, 0, Tag::Results, bytemuck::cast_slice(&results));
        assert_eq!(world.recv_vec::<i64>(0, Tag::Results, 3).unwrap(), results);
    }

    #[test]
    fn wrong_tag_in_slot_is_reported() {
        let world = detached_world(1, 2);
        post(&world, 0, 1, 0, Tag::Row(2), &[]);
        assert!(matches!(
            world.recv_bytes(0, Tag::MatrixSize),
            Err(MatvecError::UnexpectedTag {
                source_rank: 0,
                expected: Tag::MatrixSize,
                found: Tag::Row(2),
            })
        ));
    }

    #[test]
    fn message_stamped_by_another_rank_is_refused() {
        let world = detached_world(1, 3);
        post(&world, 0, 1, 2, Tag::Vector, &[9]);
        assert!(matches!(
            world.recv_bytes(0, Tag::Vector),
            Err(MatvecError::CommunicationError(_))
        ));
    }

    #[test]
    fn aborted_run_releases_a_waiting_receiver() {
        let world = detached_world(1, 2);
        let state = world.state();
        state.aborted_by.store(0, Ordering::SeqCst);
        state.aborted.store(true, Ordering::SeqCst);

        match world.recv_bytes(0, Tag::MatrixSize) {
            Err(MatvecError::CommunicationError(message)) => {
                assert!(message.contains("aborted by rank 0"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_destinations_and_oversized_payloads_are_refused() {
        let world = detached_world(0, 2);
        assert!(matches!(
            world.send_bytes(&[], 0, Tag::Vector),
            Err(MatvecError::CommunicationError(_))
        ));
        assert!(matches!(
            world.send_bytes(&[], 2, Tag::Vector),
            Err(MatvecError::InvalidRank(2))
        ));
        let large = vec![0u8; MAX_MSG_SIZE + 1];
        assert!(matches!(
            world.send_bytes(&large, 1, Tag::Vector),
            Err(MatvecError::CommunicationError(_))
        ));
    }

    #[test]
    fn oversized_worlds_are_refused() {
        assert!(matches!(World::init(0), Err(MatvecError::InitError(_))));
        assert!(matches!(
            World::init(MAX_RANKS as i32 + 1),
            Err(MatvecError::InitError(_))
        ));
    }
}
