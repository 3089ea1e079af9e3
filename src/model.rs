use anyhow::{Result, bail};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::io::dataset::Dataset;
use crate::io::params::save_model;
use crate::kernels::{partial_likelihood, weighted_parameter_update};

#[derive(Debug, Clone, PartialEq)]
pub struct BernoulliMixture {
    mixing_coefficients: Array1<f64>,
    emission_probabilities: Array2<f64>,
}

fn bounded_between_zero_and_one<'a>(values: impl IntoIterator<Item = &'a f64>) -> bool {
    values.into_iter().all(|v| (0.0..=1.0).contains(v))
}

impl BernoulliMixture {
    /// `mixing_coefficients` has length K and must sum to one;
    /// `emission_probabilities` is K×D, entry (k, d) being P(feature d = 1 | k).
    pub fn new(mixing_coefficients: Array1<f64>, emission_probabilities: Array2<f64>) -> Result<Self> {
        let n_components = emission_probabilities.nrows();
        if n_components == 0 {
            bail!("mixture needs at least one component");
        }
        if mixing_coefficients.len() != n_components {
            bail!(
                "wrong number of mixing coefficients: expected {}, got {}",
                n_components,
                mixing_coefficients.len()
            );
        }
        let total = mixing_coefficients.sum();
        if !((total - 1.0).abs() <= 1e-8 + 1e-5) {
            bail!("mixing coefficients do not sum to one, got {}", total);
        }
        if !bounded_between_zero_and_one(mixing_coefficients.iter()) {
            bail!("mixing coefficients not bounded between 0 and 1");
        }
        if !bounded_between_zero_and_one(emission_probabilities.iter()) {
            bail!("emission probabilities not bounded between 0 and 1");
        }
        Ok(Self {
            mixing_coefficients,
            emission_probabilities,
        })
    }

    pub fn n_components(&self) -> usize {
        self.emission_probabilities.nrows()
    }

    pub fn n_dimensions(&self) -> usize {
        self.emission_probabilities.ncols()
    }

    pub fn mixing_coefficients(&self) -> &Array1<f64> {
        &self.mixing_coefficients
    }

    pub fn emission_probabilities(&self) -> &Array2<f64> {
        &self.emission_probabilities
    }

    /// K - 1 mixing coefficients plus K * D emission probabilities.
    pub fn n_free_parameters(&self) -> usize {
        (self.n_components() - 1) + self.n_components() * self.n_dimensions()
    }

    fn check_dimensions(&self, dataset: &Dataset) -> Result<()> {
        if dataset.n_dimensions() != self.n_dimensions() {
            bail!(
                "dataset has {} dimensions, model expects {}",
                dataset.n_dimensions(),
                self.n_dimensions()
            );
        }
        Ok(())
    }

    /// N×K matrix of `pi_k * P(observed part of x_n | k)`.
    pub fn emission_support(&self, dataset: &Dataset) -> Result<Array2<f64>> {
        self.check_dimensions(dataset)?;
        let mut support = Array2::<f64>::zeros((dataset.n_samples(), self.n_components()));
        for (k, mut column) in support.axis_iter_mut(Axis(1)).enumerate() {
            let likelihood = partial_likelihood(
                dataset.observations().view(),
                dataset.mask().view(),
                self.emission_probabilities.row(k),
            )?;
            let pi_k = self.mixing_coefficients[k];
            column.assign(&(likelihood * pi_k));
        }
        Ok(support)
    }

    pub fn log_likelihood(&self, dataset: &Dataset) -> Result<f64> {
        self.check_dimensions(dataset)?;
        let aggregated = dataset.aggregate();
        let support = self.emission_support(&aggregated.unique)?;
        Ok(log_likelihood_from_support(support.view(), &aggregated.counts))
    }

    fn penalised_likelihood(&self, log_likelihood: f64, psi: f64) -> f64 {
        -2.0 * log_likelihood + psi * self.n_free_parameters() as f64
    }

    pub fn aic(&self, dataset: &Dataset) -> Result<f64> {
        let log_likelihood = self.log_likelihood(dataset)?;
        Ok(self.penalised_likelihood(log_likelihood, 2.0))
    }

    pub fn bic(&self, dataset: &Dataset) -> Result<f64> {
        if dataset.n_samples() == 0 {
            bail!("BIC is undefined for an empty dataset");
        }
        let log_likelihood = self.log_likelihood(dataset)?;
        let psi = (dataset.n_samples() as f64).ln();
        Ok(self.penalised_likelihood(log_likelihood, psi))
    }

    /// N×K posterior probability of each component given each sample.
    pub fn soft_assignment(&self, dataset: &Dataset) -> Result<Array2<f64>> {
        let support = self.emission_support(dataset)?;
        Ok(posterior_given_support(support))
    }

    /// Most probable component per sample; the lowest index wins ties.
    pub fn hard_assignment(&self, dataset: &Dataset) -> Result<Vec<usize>> {
        let probs = self.soft_assignment(dataset)?;
        let labels = probs
            .outer_iter()
            .map(|row| {
                let mut best = 0usize;
                for (k, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = k;
                    }
                }
                best
            })
            .collect();
        Ok(labels)
    }

    /// Maximisation step over aggregated rows.
    ///
    /// `weighted_parameter_update` returns unnormalised numerators; here each
    /// component row is divided by its total responsibility mass `u_k`. A
    /// component with no mass keeps its previous emission row.
    pub fn m_step(
        &self,
        unique_zstar: ArrayView2<'_, f64>,
        unique: &Dataset,
        counts: &[f64],
    ) -> Result<Self> {
        self.check_dimensions(unique)?;
        let n_rows = unique.n_samples();
        if unique_zstar.dim() != (n_rows, self.n_components()) {
            bail!(
                "responsibilities have shape {:?}, expected {:?}",
                unique_zstar.dim(),
                (n_rows, self.n_components())
            );
        }
        if counts.len() != n_rows {
            bail!("counts length {} does not match {} rows", counts.len(), n_rows);
        }
        let total_weight: f64 = counts.iter().sum();
        if !(total_weight > 0.0) {
            bail!("total sample weight must be positive, got {}", total_weight);
        }

        let mut zstar_times_weight = unique_zstar.to_owned();
        for (mut row, &c) in zstar_times_weight.outer_iter_mut().zip(counts) {
            row *= c;
        }

        let mut emission = weighted_parameter_update(
            unique.observations().view(),
            unique.mask().view(),
            zstar_times_weight.view(),
            self.emission_probabilities.view(),
        )?;
        let u = zstar_times_weight.sum_axis(Axis(0));

        for (k, mut row) in emission.outer_iter_mut().enumerate() {
            if u[k] > 0.0 {
                row /= u[k];
            } else {
                log::warn!("component {k} received no responsibility; keeping its emissions");
                row.assign(&self.emission_probabilities.row(k));
            }
        }

        Ok(Self {
            mixing_coefficients: u / total_weight,
            emission_probabilities: emission,
        })
    }

    /// One expectation-maximisation iteration. Returns the log-likelihood
    /// under the current parameters together with the updated model.
    pub fn em_step(&self, dataset: &Dataset) -> Result<(f64, Self)> {
        self.check_dimensions(dataset)?;
        let aggregated = dataset.aggregate();
        let support = self.emission_support(&aggregated.unique)?;
        let log_likelihood = log_likelihood_from_support(support.view(), &aggregated.counts);
        let zstar = posterior_given_support(support);
        let next = self.m_step(zstar.view(), &aggregated.unique, &aggregated.counts)?;
        log::debug!(
            "em step over {} unique rows: loglike={}",
            aggregated.counts.len(),
            log_likelihood
        );
        Ok((log_likelihood, next))
    }

    /// Draws `size` fully observed samples and the component each came from.
    pub fn sample(&self, size: usize, seed: u64) -> (Dataset, Vec<usize>) {
        let mut rng = Pcg64::seed_from_u64(seed);
        let n_dims = self.n_dimensions();
        let last = self.n_components() - 1;
        let mut observations = Array2::from_elem((size, n_dims), false);
        let mut components = Vec::with_capacity(size);

        for n in 0..size {
            let draw = rng.random::<f64>();
            let mut acc = 0.0;
            let mut component = last;
            for (k, &pi) in self.mixing_coefficients.iter().enumerate() {
                acc += pi;
                if draw < acc {
                    component = k;
                    break;
                }
            }
            for d in 0..n_dims {
                observations[(n, d)] =
                    rng.random::<f64>() < self.emission_probabilities[(component, d)];
            }
            components.push(component);
        }

        (Dataset::fully_observed(observations), components)
    }

    pub fn save_params(&self, path: &std::path::Path) -> Result<()> {
        save_model(path, self)
    }
}

/// `sum_n counts[n] * ln(sum_k support[n, k])`.
pub fn log_likelihood_from_support(support: ArrayView2<'_, f64>, counts: &[f64]) -> f64 {
    support
        .outer_iter()
        .zip(counts)
        .map(|(row, &c)| row.sum().ln() * c)
        .sum()
}

/// Normalises each support row to sum to one.
pub fn posterior_given_support(mut support: Array2<f64>) -> Array2<f64> {
    for mut row in support.outer_iter_mut() {
        let total = row.sum();
        row /= total;
    }
    support
}
