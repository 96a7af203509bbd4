//! Row-pipelined matrix–vector multiplication.
//!
//! Rank 0 owns the whole matrix. It computes the scalar products of its own stripe, then hands
//! rank 1 the matrix size, the results so far, the column vector, and every row it did not
//! compute. Each following rank does the same with what it received, so the set of rows shrinks
//! and the result vector grows at every hop. The last rank ends up with the complete result and,
//! unless gathering is disabled, sends it back to rank 0.
//!
//! Messages of one hop, in order:
//!
//! | tag                | payload                                   |
//! |--------------------|-------------------------------------------|
//! | `MatrixSize`       | `u64`                                     |
//! | `Results`          | `stripe.start` values of type `i64`       |
//! | `Vector`           | `matrix_size` values of type `i32`        |
//! | `Row(k)`           | the `k`-th forwarded row, `matrix_size` × `i32` |
//!
//! The gather is a single `FinalResults` message of `matrix_size` × `i64` from the last rank.

use std::io::Write;

use log::debug;

use crate::comm::{Communicator, Tag};
use crate::error::{MatvecError, Result};
use crate::matrix::{scalar_product, ColumnVector, Matrix};
use crate::report::Reporter;
use crate::stripe::{RemainderPolicy, RowStripe, RunContext};

/// Where rank 0 got its data from; only changes what gets printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOrigin {
    File,
    Generated,
}

/// The data rank 0 starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub matrix: Matrix,
    pub vector: ColumnVector,
    pub matrix_origin: InputOrigin,
    pub vector_origin: InputOrigin,
}

impl Input {
    pub fn new(matrix: Matrix, vector: ColumnVector) -> Self {
        Self {
            matrix,
            vector,
            matrix_origin: InputOrigin::Generated,
            vector_origin: InputOrigin::Generated,
        }
    }

    /// Fails unless the matrix is square and as wide as the vector is long.
    pub fn validate(&self) -> Result<()> {
        if !self.matrix.is_square() {
            return Err(MatvecError::ShapeMismatch(format!(
                "matrix must be square, got {}x{}",
                self.matrix.height(),
                self.matrix.width()
            )));
        }
        if self.matrix.width() != self.vector.len() {
            return Err(MatvecError::ShapeMismatch(format!(
                "matrix has {} columns but the vector has {} values",
                self.matrix.width(),
                self.vector.len()
            )));
        }
        if self.matrix.height() == 0 {
            return Err(MatvecError::ShapeMismatch("matrix is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub policy: RemainderPolicy,
    /// Send the complete result vector from the last rank back to rank 0.
    pub gather: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            policy: RemainderPolicy::AssignToLast,
            gather: true,
        }
    }
}

/// Where a rank is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitingSize,
    Computing,
    Forwarding,
    Done,
}

/// What a rank knows once it is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankOutcome {
    pub rank: usize,
    pub stripe: RowStripe,
    /// Results of all rows up to the end of this rank's stripe.
    pub results: Vec<i64>,
    /// The complete result vector; present at rank 0 when gathered, and on a single rank.
    pub final_results: Option<Vec<i64>>,
    /// Stages this rank went through, in order.
    pub stages: Vec<Stage>,
}

/// Working set of one rank: the rows it still holds and the results computed so far.
struct Hop {
    context: RunContext,
    vector: ColumnVector,
    // rows[0] is global row `context.own_stripe().start`
    rows: Vec<Vec<i32>>,
    results: Vec<i64>,
}

struct RankPipeline<'a, C, W: Write> {
    comm: &'a C,
    reporter: &'a mut Reporter<W>,
    options: PipelineOptions,
    stages: Vec<Stage>,
}

impl<'a, C: Communicator, W: Write> RankPipeline<'a, C, W> {
    fn enter(&mut self, stage: Stage) {
        if let Some(current) = self.stages.last() {
            debug!("Rank {}: {:?} -> {:?}", self.comm.rank(), current, stage);
        }
        self.stages.push(stage);
    }

    fn start(&mut self, input: Input) -> Result<Hop> {
        input.validate()?;
        let Input {
            matrix,
            vector,
            matrix_origin,
            vector_origin,
        } = input;

        self.reporter.matrix(
            match matrix_origin {
                InputOrigin::File => "Read the following matrix in input file",
                InputOrigin::Generated => "Just created the following matrix",
            },
            &matrix,
        )?;
        self.reporter.values(
            match vector_origin {
                InputOrigin::File => "Read the following column vector in input file",
                InputOrigin::Generated => "Just generated the following column vector (line displayed)",
            },
            vector.as_slice(),
        )?;

        let context = RunContext::new(
            0,
            self.comm.size() as usize,
            matrix.height(),
            self.options.policy,
        )?;

        Ok(Hop {
            context,
            vector,
            rows: matrix.into_rows(),
            results: Vec::with_capacity(context.matrix_size()),
        })
    }

    fn receive(&mut self) -> Result<Hop> {
        let rank = self.comm.rank();
        let source = rank - 1;

        let matrix_size: u64 = self.comm.recv(source, Tag::MatrixSize)?;
        self.reporter.line(format_args!(
            "Just received the matrix size ({}) from process n°{}",
            matrix_size, source
        ))?;

        let context = RunContext::new(
            rank as usize,
            self.comm.size() as usize,
            matrix_size as usize,
            self.options.policy,
        )?;
        let held = context.rows_held();

        let mut results: Vec<i64> = self.comm.recv_vec(source, Tag::Results, held.start)?;
        results.reserve(context.matrix_size() - held.start);
        self.reporter.values(
            &format!("Just received the following calculated results from process n°{}", source),
            &results,
        )?;

        let vector =
            ColumnVector::new(self.comm.recv_vec(source, Tag::Vector, context.matrix_size())?);
        self.reporter.values(
            &format!("Just received the following column vector from process n°{}", source),
            vector.as_slice(),
        )?;

        let mut rows = Vec::with_capacity(held.len());
        for offset in 0..held.len() {
            let row: Vec<i32> =
                self.comm
                    .recv_vec(source, Tag::Row(offset), context.matrix_size())?;
            self.reporter.values(
                &format!("Just received the following line from process n°{}", source),
                &row,
            )?;
            rows.push(row);
        }

        Ok(Hop {
            context,
            vector,
            rows,
            results,
        })
    }

    fn forward(&mut self, hop: &Hop, dest: i32) -> Result<()> {
        let size = hop.context.matrix_size();

        self.comm.send(&(size as u64), dest, Tag::MatrixSize)?;
        self.reporter.line(format_args!(
            "Just sent the matrix size ({}) to process n°{}",
            size, dest
        ))?;

        self.comm.send_slice(&hop.results, dest, Tag::Results)?;
        self.reporter.values(
            &format!("Just sent the following calculated results to process n°{}", dest),
            &hop.results,
        )?;

        self.comm.send_slice(hop.vector.as_slice(), dest, Tag::Vector)?;
        self.reporter.values(
            &format!("Just sent the following column vector to process n°{}", dest),
            hop.vector.as_slice(),
        )?;

        for (offset, row) in hop.rows.iter().enumerate() {
            self.comm.send_slice(row, dest, Tag::Row(offset))?;
            self.reporter.values(
                &format!("Just sent the following line to process n°{}", dest),
                row,
            )?;
        }
        Ok(())
    }

    fn run(&mut self, input: Option<Input>) -> Result<RankOutcome> {
        let rank = self.comm.rank();
        let mut hop = if rank == 0 {
            let input = input.ok_or_else(|| {
                MatvecError::InitError("rank 0 needs a matrix and a vector to start from".into())
            })?;
            self.start(input)?
        } else {
            let hop = self.receive()?;
            self.enter(Stage::Computing);
            hop
        };

        let stripe = hop.context.own_stripe();
        let products = compute_stripe(&hop.rows[..stripe.len()], &hop.vector);
        hop.results.extend_from_slice(&products);
        hop.rows.drain(..stripe.len());
        self.reporter.values(
            &format!("Computed rows {}..{}", stripe.start, stripe.end),
            &products,
        )?;

        let mut final_results = None;
        match hop.context.successor() {
            Some(next) => {
                self.enter(Stage::Forwarding);
                self.forward(&hop, next as i32)?;
            }
            None if self.options.gather && rank != 0 => {
                self.enter(Stage::Forwarding);
                self.comm.send_slice(&hop.results, 0, Tag::FinalResults)?;
                self.reporter.values(
                    "Just sent the following final results to process n°0",
                    &hop.results,
                )?;
            }
            None => {}
        }

        if rank == 0 {
            if hop.context.is_last() {
                final_results = Some(hop.results.clone());
            } else if self.options.gather {
                let last = hop.context.process_count() as i32 - 1;
                final_results = Some(self.comm.recv_vec(
                    last,
                    Tag::FinalResults,
                    hop.context.matrix_size(),
                )?);
            }
            if let Some(results) = &final_results {
                self.reporter.values("Final result vector", results)?;
            }
        }

        self.enter(Stage::Done);
        Ok(RankOutcome {
            rank: rank as usize,
            stripe,
            results: hop.results,
            final_results,
            stages: std::mem::take(&mut self.stages),
        })
    }
}

/// Scalar products of `rows` with `vector`, in row order.
pub fn compute_stripe(rows: &[Vec<i32>], vector: &ColumnVector) -> Vec<i64> {
    rows.iter()
        .map(|row| scalar_product(row, vector.as_slice()))
        .collect()
}

/// Run this rank's part of the pipeline.
///
/// Rank 0 must be given the `input`; other ranks ignore it and receive their data from their
/// predecessor. Progress is printed through `reporter`.
///
/// # Examples
///
/// ```rust,no_run
/// use ring_matvec::comm::{Communicator, LocalWorld};
/// use ring_matvec::matrix::{ColumnVector, Matrix};
/// use ring_matvec::pipeline::{run_rank, Input, PipelineOptions};
/// use ring_matvec::report::Reporter;
///
/// let matrix = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
/// let input = Input::new(matrix, ColumnVector::new(vec![1, 1]));
///
/// let outcomes = LocalWorld::run(2, |comm| {
///     let input = (comm.rank() == 0).then(|| input.clone());
///     let mut reporter = Reporter::stdout(comm.rank() as usize);
///     run_rank(comm, input, &PipelineOptions::default(), &mut reporter)
/// })
/// .unwrap();
///
/// assert_eq!(outcomes[0].final_results, Some(vec![3, 7]));
/// ```
pub fn run_rank<C: Communicator, W: Write>(
    comm: &C,
    input: Option<Input>,
    options: &PipelineOptions,
    reporter: &mut Reporter<W>,
) -> Result<RankOutcome> {
    // rank 0 already holds its data and starts computing right away
    let stage = if comm.rank() == 0 {
        Stage::Computing
    } else {
        Stage::AwaitingSize
    };
    RankPipeline {
        comm,
        reporter,
        options: *options,
        stages: vec![stage],
    }
    .run(input)
}
