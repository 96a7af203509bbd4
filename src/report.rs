//! Human-readable progress output.
//!
//! Every line starts with `[process n°<rank>] ` so that the interleaved output of all ranks can be
//! told apart on a shared terminal.

use std::fmt::{self, Display};
use std::io::{self, Write};

use crate::error::Result;
use crate::matrix::Matrix;

pub struct Reporter<W: Write> {
    rank: usize,
    out: W,
}

impl Reporter<io::Stdout> {
    pub fn stdout(rank: usize) -> Self {
        Self::new(rank, io::stdout())
    }
}

impl Reporter<io::Sink> {
    /// A reporter that discards everything.
    pub fn silent(rank: usize) -> Self {
        Self::new(rank, io::sink())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(rank: usize, out: W) -> Self {
        Self { rank, out }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Print one prefixed line.
    pub fn line(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        // One write per line keeps lines whole when several processes share stdout.
        let text = format!("{}{}\n", header(self.rank), args);
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    /// Print a titled list of values on a single line.
    pub fn values<T: Display>(&mut self, title: &str, values: &[T]) -> Result<()> {
        self.line(format_args!("{} : {}", title, join(values)))
    }

    /// Print a title line followed by the matrix rows and a blank line.
    pub fn matrix(&mut self, title: &str, matrix: &Matrix) -> Result<()> {
        let text = format!("{}{} :\n{}\n", header(self.rank), title, matrix);
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn header(rank: usize) -> String {
    format!("[process n°{}] ", rank)
}

fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
