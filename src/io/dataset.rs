use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::kernels::ShapeError;

/// Binary observations plus the mask of which cells were actually observed.
/// Both matrices always share one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    observations: Array2<bool>,
    mask: Array2<bool>,
}

/// Unique rows of a dataset and how many times each occurred.
#[derive(Debug, Clone)]
pub struct AggregatedDataset {
    pub unique: Dataset,
    pub counts: Vec<f64>,
}

const MISSING: u8 = 2;

impl Dataset {
    pub fn new(observations: Array2<bool>, mask: Array2<bool>) -> Result<Self, ShapeError> {
        if observations.dim() != mask.dim() {
            return Err(ShapeError::Matrix {
                name: "mask",
                expected: observations.dim(),
                actual: mask.dim(),
            });
        }
        Ok(Self { observations, mask })
    }

    pub fn fully_observed(observations: Array2<bool>) -> Self {
        let mask = Array2::from_elem(observations.dim(), true);
        Self { observations, mask }
    }

    pub fn observations(&self) -> &Array2<bool> {
        &self.observations
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn n_samples(&self) -> usize {
        self.observations.nrows()
    }

    pub fn n_dimensions(&self) -> usize {
        self.observations.ncols()
    }

    pub fn n_missing(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    fn encoded_row(&self, n: usize) -> Vec<u8> {
        self.observations
            .row(n)
            .iter()
            .zip(self.mask.row(n).iter())
            .map(|(&x, &m)| encode_cell(x, m))
            .collect()
    }

    /// Collapses duplicate rows. Cells hidden by the mask do not distinguish
    /// rows. Unique rows come out in sorted order.
    pub fn aggregate(&self) -> AggregatedDataset {
        let mut seen: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
        for n in 0..self.n_samples() {
            *seen.entry(self.encoded_row(n)).or_insert(0) += 1;
        }

        let n_dims = self.n_dimensions();
        let mut observations = Array2::from_elem((seen.len(), n_dims), false);
        let mut mask = Array2::from_elem((seen.len(), n_dims), false);
        let mut counts = Vec::with_capacity(seen.len());
        for (u, (cells, count)) in seen.into_iter().enumerate() {
            for (d, cell) in cells.into_iter().enumerate() {
                let (x, m) = decode_cell(cell);
                observations[(u, d)] = x;
                mask[(u, d)] = m;
            }
            counts.push(count as f64);
        }
        log::debug!(
            "aggregated {} samples into {} unique rows",
            self.n_samples(),
            counts.len()
        );

        AggregatedDataset {
            unique: Dataset { observations, mask },
            counts,
        }
    }
}

#[inline]
fn encode_cell(observed: bool, present: bool) -> u8 {
    match (present, observed) {
        (false, _) => MISSING,
        (true, false) => 0,
        (true, true) => 1,
    }
}

#[inline]
fn decode_cell(cell: u8) -> (bool, bool) {
    match cell {
        0 => (false, true),
        1 => (true, true),
        _ => (false, false),
    }
}

fn map_char(b: u8) -> Option<u8> {
    match b {
        b'0' => Some(0),
        b'1' => Some(1),
        b'?' | b'.' | b'N' | b'n' => Some(MISSING),
        _ => None,
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read {:?}", path))?;
    Ok(content)
}

/// Reads one sample per line: `0`, `1`, or a missing marker (`?`, `.`, `N`).
/// Whitespace is ignored; blank lines and `#` comments are skipped.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let content = read_to_string(path)?;
    parse_dataset(&content).with_context(|| format!("failed to parse {:?}", path))
}

pub fn parse_dataset(content: &str) -> Result<Dataset> {
    let mut rows: Vec<Vec<u8>> = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut row = Vec::with_capacity(line.len());
        for (col, b) in line.bytes().enumerate() {
            if b.is_ascii_whitespace() {
                continue;
            }
            match map_char(b) {
                Some(v) => row.push(v),
                None => bail!(
                    "invalid character {:?} at line {}, column {}",
                    b as char,
                    line_no + 1,
                    col + 1
                ),
            }
        }
        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                bail!(
                    "line {} has {} features, expected {}",
                    line_no + 1,
                    row.len(),
                    first.len()
                );
            }
        }
        rows.push(row);
    }

    let n_dims = rows.first().map(Vec::len).unwrap_or(0);
    let mut observations = Array2::from_elem((rows.len(), n_dims), false);
    let mut mask = Array2::from_elem((rows.len(), n_dims), false);
    for (n, row) in rows.iter().enumerate() {
        for (d, &cell) in row.iter().enumerate() {
            let (x, m) = decode_cell(cell);
            observations[(n, d)] = x;
            mask[(n, d)] = m;
        }
    }
    Ok(Dataset { observations, mask })
}

pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    let mut line = String::with_capacity(dataset.n_dimensions() + 1);
    for n in 0..dataset.n_samples() {
        line.clear();
        for (&x, &m) in dataset
            .observations()
            .row(n)
            .iter()
            .zip(dataset.mask().row(n).iter())
        {
            line.push(match encode_cell(x, m) {
                0 => '0',
                1 => '1',
                _ => '?',
            });
        }
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write {:?}", path))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
