//! Text input for matrices and column vectors.
//!
//! A matrix file holds one row per line with whitespace-separated integers. The number of values
//! on the first non-empty line fixes the width, and the matrix must be square: exactly `width`
//! rows of `width` values. Anything else is reported with the offending line number.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{MatvecError, Result};
use crate::matrix::{ColumnVector, Matrix};

/// Parse a square matrix from its textual form.
pub fn parse_matrix(text: &str) -> Result<Matrix> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let (first_line, first) = lines.next().ok_or_else(|| MatvecError::Parse {
        line: 1,
        message: "matrix file is empty".into(),
    })?;
    let first_row = parse_values(first_line, first)?;
    let width = first_row.len();

    let mut rows = Vec::with_capacity(width);
    rows.push(first_row);
    let mut last_line = first_line;

    for (line, content) in lines {
        if rows.len() == width {
            return Err(MatvecError::Parse {
                line,
                message: format!("expected {} rows, found extra data", width),
            });
        }
        let row = parse_values(line, content)?;
        if row.len() != width {
            return Err(MatvecError::Parse {
                line,
                message: format!("expected {} values, found {}", width, row.len()),
            });
        }
        rows.push(row);
        last_line = line;
    }

    if rows.len() != width {
        return Err(MatvecError::Parse {
            line: last_line + 1,
            message: format!("expected {} rows, found {}", width, rows.len()),
        });
    }

    Matrix::from_rows(rows)
}

/// Parse a column vector: whitespace-separated integers, possibly spanning several lines.
pub fn parse_vector(text: &str) -> Result<ColumnVector> {
    let mut values = Vec::new();
    for (index, line) in text.lines().enumerate() {
        values.extend(parse_values(index + 1, line)?);
    }
    if values.is_empty() {
        return Err(MatvecError::Parse {
            line: 1,
            message: "vector file is empty".into(),
        });
    }
    Ok(ColumnVector::new(values))
}

pub fn read_matrix_from_file(path: &Path) -> Result<Matrix> {
    debug!("Reading matrix from {}", path.display());
    parse_matrix(&fs::read_to_string(path)?)
}

pub fn read_vector_from_file(path: &Path) -> Result<ColumnVector> {
    debug!("Reading column vector from {}", path.display());
    parse_vector(&fs::read_to_string(path)?)
}

fn parse_values(line: usize, content: &str) -> Result<Vec<i32>> {
    content
        .split_whitespace()
        .map(|token| {
            token.parse::<i32>().map_err(|_| MatvecError::Parse {
                line,
                message: format!("invalid integer `{}`", token),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse_error(text: &str) -> (usize, String) {
        match parse_matrix(text) {
            Err(MatvecError::Parse { line, message }) => (line, message),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn parses_square_matrix_with_trailing_spaces() {
        let matrix = parse_matrix("1 2 3 \n4 5 6 \n7 8 9 \n").unwrap();
        assert_eq!(matrix.height(), 3);
        assert_eq!(matrix.width(), 3);
        assert_eq!(matrix.row(2).unwrap(), &[7, 8, 9]);
    }

    #[test]
    fn blank_lines_are_ignored() {
        let matrix = parse_matrix("\n1 -2\n\n3 4\n\n").unwrap();
        assert_eq!(matrix.rows(), &[vec![1, -2], vec![3, 4]]);
    }

    #[test]
    fn short_row_is_reported() {
        let (line, message) = parse_error("1 2 3\n4 5\n7 8 9\n");
        assert_eq!(line, 2);
        assert!(message.contains("expected 3 values, found 2"));
    }

    #[test]
    fn missing_rows_are_reported() {
        let (line, message) = parse_error("1 2 3\n4 5 6\n");
        assert_eq!(line, 3);
        assert!(message.contains("expected 3 rows, found 2"));
    }

    #[test]
    fn extra_rows_are_reported() {
        let (line, _) = parse_error("1 2\n3 4\n5 6\n");
        assert_eq!(line, 3);
    }

    #[test]
    fn garbage_is_reported() {
        let (line, message) = parse_error("1 2\n3 x\n");
        assert_eq!(line, 2);
        assert!(message.contains("`x`"));
    }

    #[test]
    fn empty_input_is_reported() {
        assert_eq!(parse_error("  \n").0, 1);
    }

    #[test]
    fn vector_may_span_lines() {
        let vector = parse_vector("1 0\n1 0\n").unwrap();
        assert_eq!(vector.as_slice(), &[1, 0, 1, 0]);
        assert!(parse_vector("").is_err());
    }

    #[test]
    fn reads_matrix_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 2").unwrap();
        writeln!(file, "3 4").unwrap();
        let matrix = read_matrix_from_file(file.path()).unwrap();
        assert_eq!(matrix.get(1, 0).unwrap(), 3);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_matrix_from_file(&dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, MatvecError::Io(_)));
    }
}
