//! JSON persistence of mixture parameters.

use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::model::BernoulliMixture;

/// On-disk layout: one mixing coefficient per component and one emission
/// row of D probabilities per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureParamsFile {
    pub mixing_coefficients: Vec<f64>,
    pub emission_probabilities: Vec<Vec<f64>>,
}

impl MixtureParamsFile {
    pub fn from_model(model: &BernoulliMixture) -> Self {
        Self {
            mixing_coefficients: model.mixing_coefficients().to_vec(),
            emission_probabilities: model
                .emission_probabilities()
                .outer_iter()
                .map(|row| row.to_vec())
                .collect(),
        }
    }

    /// Rejects ragged emission rows, then applies the model's own validation.
    pub fn into_model(self) -> Result<BernoulliMixture> {
        let n_components = self.emission_probabilities.len();
        let n_dims = self.emission_probabilities.first().map(Vec::len).unwrap_or(0);
        let mut flat = Vec::with_capacity(n_components * n_dims);
        for (k, row) in self.emission_probabilities.into_iter().enumerate() {
            if row.len() != n_dims {
                bail!(
                    "emission row {} has {} probabilities, expected {}",
                    k,
                    row.len(),
                    n_dims
                );
            }
            flat.extend(row);
        }
        let emission = Array2::from_shape_vec((n_components, n_dims), flat)
            .context("failed to reshape emission probabilities")?;
        BernoulliMixture::new(Array1::from(self.mixing_coefficients), emission)
    }
}

pub fn save_model(path: &Path, model: &BernoulliMixture) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &MixtureParamsFile::from_model(model))
        .with_context(|| format!("failed to write model parameters to {:?}", path))
}

pub fn load_model(path: &Path) -> Result<BernoulliMixture> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let params: MixtureParamsFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse model parameters in {:?}", path))?;
    params
        .into_model()
        .with_context(|| format!("invalid model parameters in {:?}", path))
}
