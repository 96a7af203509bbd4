//! Row-pipelined matrix–vector multiplication over message passing.
//!
//! A square integer matrix is multiplied by a column vector by a chain of cooperating processes.
//! Rank 0 computes the first stripe of rows and passes everything it did not compute to rank 1,
//! which does the same for rank 2, and so on down the chain. The last rank ends up with the full
//! result vector and returns it to rank 0.
//!
//! # Features
//!
//! - **Point-to-Point Communication**: tagged, blocking send and receive between ranks
//! - **Two Transports**: separate processes over POSIX shared memory, or threads in one process
//! - **Pipelined Protocol**: rows and partial results move down the chain one hop at a time
//! - **Input**: matrices and vectors from text files, or generated from a seed
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ring_matvec::comm::{Communicator, World};
//! use ring_matvec::config::RunConfig;
//! use ring_matvec::pipeline::run_rank;
//! use ring_matvec::report::Reporter;
//!
//! let config = RunConfig::default();
//!
//! // Only rank 0 reads or generates the input, before the other processes exist
//! let input = if World::is_spawned() { None } else { Some(config.load_input().unwrap()) };
//!
//! let world = World::init(config.processes as i32).unwrap();
//! let mut reporter = Reporter::stdout(world.rank() as usize);
//! let outcome = run_rank(&world, input, &config.options, &mut reporter).unwrap();
//!
//! if let Some(result) = outcome.final_results {
//!     println!("A·v = {:?}", result);
//! }
//!
//! world.finalize().unwrap();
//! ```
//!
//! # Architecture
//!
//! [`comm::World`] spawns copies of the running program and gives each ordered pair of ranks a
//! dedicated message slot in a shared memory segment. [`comm::LocalWorld`] offers the same
//! [`comm::Communicator`] interface over threads and channels, which is what the tests use.
//! [`pipeline::run_rank`] drives one rank through the protocol on either transport.
//!
//! # Error Handling
//!
//! All operations return a [`Result`] with variants of [`MatvecError`]. Errors are not retried:
//! a failed exchange ends the rank, and the binary aborts the whole run.

pub mod comm;
pub mod config;
pub mod error;
pub mod input;
pub mod matrix;
pub mod pipeline;
pub mod report;
pub mod stripe;

pub use error::{MatvecError, Result};
