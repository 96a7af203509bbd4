//! Run configuration and input loading.

use std::path::PathBuf;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::comm::shm::{MAX_MSG_SIZE, MAX_RANKS};
use crate::error::{MatvecError, Result};
use crate::input::{read_matrix_from_file, read_vector_from_file};
use crate::matrix::{
    ColumnVector, Matrix, DEFAULT_HIGHEST_VALUE, DEFAULT_LOWEST_VALUE, DEFAULT_MATRIX_SIZE,
};
use crate::pipeline::{Input, InputOrigin, PipelineOptions};
use crate::stripe::RunContext;

pub const DEFAULT_PROCESSES: usize = 2;

/// Refuse matrix sizes whose complete result vector would not fit in one message.
fn check_message_size(matrix_size: usize) -> Result<()> {
    let bytes = matrix_size.saturating_mul(std::mem::size_of::<i64>());
    if bytes > MAX_MSG_SIZE {
        return Err(MatvecError::InvalidConfig(format!(
            "a {0}x{0} matrix needs {1}-byte result messages, at most {2} bytes fit",
            matrix_size, bytes, MAX_MSG_SIZE
        )));
    }
    Ok(())
}

/// Where rank 0 gets its matrix from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixSource {
    File(PathBuf),
    Random { size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub processes: usize,
    pub matrix: MatrixSource,
    /// Read the column vector from this file instead of generating it.
    pub vector_file: Option<PathBuf>,
    /// Half-open range `[lower, upper)` for generated values.
    pub lower: i32,
    pub upper: i32,
    pub seed: Option<u64>,
    pub options: PipelineOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            processes: DEFAULT_PROCESSES,
            matrix: MatrixSource::Random {
                size: DEFAULT_MATRIX_SIZE,
            },
            vector_file: None,
            lower: DEFAULT_LOWEST_VALUE,
            upper: DEFAULT_HIGHEST_VALUE,
            seed: None,
            options: PipelineOptions::default(),
        }
    }
}

impl RunConfig {
    /// Check everything that can be checked without reading input.
    pub fn validate(&self) -> Result<()> {
        if self.processes == 0 || self.processes > MAX_RANKS {
            return Err(MatvecError::InvalidConfig(format!(
                "process count must be between 1 and {}, got {}",
                MAX_RANKS, self.processes
            )));
        }
        if self.lower >= self.upper {
            return Err(MatvecError::InvalidConfig(format!(
                "value bounds [{}, {}) are empty",
                self.lower, self.upper
            )));
        }
        if let MatrixSource::Random { size } = self.matrix {
            check_message_size(size)?;
            RunContext::new(0, self.processes, size, self.options.policy)?;
        }
        Ok(())
    }

    /// Build rank 0's input: read or generate the matrix and the vector, then check that they fit
    /// together and with the process count.
    pub fn load_input(&self) -> Result<Input> {
        self.validate()?;

        let mut rng = match self.seed {
            Some(seed) => {
                debug!("Using random seed {}", seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };

        let (matrix, matrix_origin) = match &self.matrix {
            MatrixSource::File(path) => (read_matrix_from_file(path)?, InputOrigin::File),
            MatrixSource::Random { size } => (
                Matrix::random(*size, *size, self.lower, self.upper, &mut rng)?,
                InputOrigin::Generated,
            ),
        };

        let (vector, vector_origin) = match &self.vector_file {
            Some(path) => (read_vector_from_file(path)?, InputOrigin::File),
            None => (
                ColumnVector::random(matrix.width(), self.lower, self.upper, &mut rng)?,
                InputOrigin::Generated,
            ),
        };

        let input = Input {
            matrix,
            vector,
            matrix_origin,
            vector_origin,
        };
        input.validate()?;
        check_message_size(input.matrix.height())?;
        RunContext::new(0, self.processes, input.matrix.height(), self.options.policy)?;

        info!(
            "Loaded a {}x{} matrix for {} processes",
            input.matrix.height(),
            input.matrix.width(),
            self.processes
        );
        Ok(input)
    }
}
