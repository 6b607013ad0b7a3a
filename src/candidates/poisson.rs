//! Poisson candidate with a Gamma conjugate prior on every axis rate.
//!
//! Meant for count-valued streams: coordinates are rounded to the nearest
//! count for queries, negative coordinates are outside the support. The
//! posterior predictive is the negative binomial `rv` derives from the
//! updated Gamma parameters.

use itertools::izip;
use log::debug;
use nalgebra::DVector;
use rand::RngCore;
use rv::data::DataOrSuffStat;
use rv::dist::{Gamma, Poisson};
use rv::data::PoissonSuffStat;
use rv::traits::{ConjugatePrior, Sampleable};

use super::normal::{check_batch, check_dimension};
use super::{CandidateModel, DataType};
use crate::error::MixtureError;
use crate::factory::RestoreParams;
use crate::persist::{
    fmt_f64, fmt_scalars, fmt_vector, parse_f64, parse_scalars, parse_vector, StateReader,
    StateWriter,
};

pub const TYPE_TAG: &str = "poisson";

/// Gamma(shape, rate) hyperparameters shared by every axis.
#[derive(Clone, Copy, Debug, PartialEq)]
struct GammaParams {
    shape: f64,
    rate: f64,
}

impl GammaParams {
    fn new(shape: f64, rate: f64) -> Option<Self> {
        (shape.is_finite() && rate.is_finite() && shape > 0.0 && rate > 0.0)
            .then_some(Self { shape, rate })
    }
}

impl Default for GammaParams {
    fn default() -> Self {
        Self {
            shape: 1.0,
            rate: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoissonCandidate {
    data_type: DataType,
    prior: GammaParams,
    /// Total evidence mass folded in so far, identical across axes.
    weight: f64,
    /// Per-axis weighted sum of counts.
    sum: DVector<f64>,
}

impl PoissonCandidate {
    pub fn new(dimension: usize, data_type: DataType) -> Self {
        Self {
            data_type,
            prior: GammaParams::default(),
            weight: 0.0,
            sum: DVector::zeros(dimension),
        }
    }

    /// Override the per-axis Gamma hyperparameters.
    pub fn with_prior(
        dimension: usize,
        data_type: DataType,
        shape: f64,
        rate: f64,
    ) -> Option<Self> {
        Some(Self {
            data_type,
            prior: GammaParams::new(shape, rate)?,
            weight: 0.0,
            sum: DVector::zeros(dimension),
        })
    }

    fn in_support(point: &DVector<f64>) -> bool {
        point.iter().all(|&x| x >= 0.0 && x.is_finite())
    }

    fn posterior_axis(&self, i: usize) -> Gamma {
        Gamma::new_unchecked(self.prior.shape + self.sum[i], self.prior.rate + self.weight)
    }

    fn axis_log_predictive(&self, i: usize, x: f64) -> f64 {
        let k = x.round() as u32;
        let empty = PoissonSuffStat::new();
        let stat: DataOrSuffStat<u32, Poisson> = DataOrSuffStat::SuffStat(&empty);
        self.posterior_axis(i).ln_pp(&k, &stat)
    }

    fn posterior_rates(&self) -> DVector<f64> {
        DVector::from_fn(self.sum.len(), |i, _| {
            (self.prior.shape + self.sum[i]) / (self.prior.rate + self.weight)
        })
    }

    pub(crate) fn restore(
        dimension: usize,
        data_type: DataType,
        _params: &RestoreParams,
        reader: &mut dyn StateReader,
    ) -> Option<Box<dyn CandidateModel>> {
        let mut prior = None;
        let mut count = None;
        let mut sum = None;

        if reader.enter() {
            loop {
                let name = reader.name().to_owned();
                let value = reader.value().map(str::to_owned);
                match (name.as_str(), value) {
                    ("prior", Some(v)) => prior = parse_scalars(&v, 2),
                    ("count", Some(v)) => count = parse_f64(&v),
                    ("sum", Some(v)) => sum = parse_vector(&v, dimension),
                    _ => {}
                }
                if !reader.advance() {
                    break;
                }
            }
            reader.leave();
        }

        let p = prior?;
        let prior = GammaParams::new(p[0], p[1])?;
        let weight = count?;
        let sum = sum?;
        if !(weight >= 0.0) || !weight.is_finite() || sum.iter().any(|v| !(*v >= 0.0)) {
            return None;
        }
        Some(Box::new(Self {
            data_type,
            prior,
            weight,
            sum,
        }))
    }
}

impl CandidateModel for PoissonCandidate {
    fn dimension(&self) -> usize {
        self.sum.len()
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn type_tag(&self) -> &'static str {
        TYPE_TAG
    }

    fn non_informative(&self) -> Box<dyn CandidateModel> {
        Box::new(Self {
            data_type: self.data_type,
            prior: self.prior,
            weight: 0.0,
            sum: DVector::zeros(self.dimension()),
        })
    }

    fn boxed_clone(&self) -> Box<dyn CandidateModel> {
        Box::new(self.clone())
    }

    fn add_observations(
        &mut self,
        points: &[DVector<f64>],
        weights: &[f64],
    ) -> Result<(), MixtureError> {
        check_batch(self.dimension(), points, weights)?;
        for (point, &w) in izip!(points, weights) {
            if !(w > 0.0) {
                continue;
            }
            if !Self::in_support(point) {
                debug!("poisson candidate discarding a negative observation");
                continue;
            }
            self.weight += w;
            self.sum += point * w;
        }
        Ok(())
    }

    fn joint_log_marginal_likelihood(&self, point: &DVector<f64>) -> Result<f64, MixtureError> {
        check_dimension(self.dimension(), point)?;
        if !Self::in_support(point) {
            return Ok(f64::NEG_INFINITY);
        }
        let mut total = 0.0;
        for i in 0..self.dimension() {
            total += self.axis_log_predictive(i, point[i]);
        }
        Ok(total)
    }

    fn propagate_forward_by_time(&mut self, interval: f64, decay_rate: f64) {
        if !(interval > 0.0) || decay_rate <= 0.0 {
            return;
        }
        let factor = (-decay_rate * interval).exp();
        self.weight *= factor;
        self.sum *= factor;
    }

    fn marginal_likelihood_mean(&self) -> DVector<f64> {
        self.posterior_rates()
    }

    fn marginal_likelihood_mode(&self) -> DVector<f64> {
        self.posterior_rates().map(f64::floor)
    }

    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<DVector<f64>> {
        let mut rng = rng;
        (0..n)
            .map(|_| {
                DVector::from_fn(self.dimension(), |i, _| {
                    let rate: f64 = self.posterior_axis(i).draw(&mut rng);
                    if rate > 0.0 {
                        let k: u32 = Poisson::new_unchecked(rate).draw(&mut rng);
                        f64::from(k)
                    } else {
                        0.0
                    }
                })
            })
            .collect()
    }

    fn persist(&self, writer: &mut dyn StateWriter) {
        writer.write_field("prior", &fmt_scalars(&[self.prior.shape, self.prior.rate]));
        writer.write_field("count", &fmt_f64(self.weight));
        writer.write_field("sum", &fmt_vector(&self.sum));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{DocumentReader, DocumentWriter};

    fn counts(xs: &[f64]) -> Vec<DVector<f64>> {
        xs.iter().map(|&x| DVector::from_vec(vec![x])).collect()
    }

    #[test]
    fn negative_points_are_out_of_support() {
        let candidate = PoissonCandidate::new(1, DataType::Integer);
        let ll = candidate
            .joint_log_marginal_likelihood(&DVector::from_vec(vec![-2.0]))
            .unwrap();
        assert!(ll.is_infinite() && ll < 0.0);
        assert!(!ll.is_nan());
    }

    #[test]
    fn predictive_mass_sums_to_one() {
        let mut candidate = PoissonCandidate::new(1, DataType::Integer);
        let data = counts(&[3.0, 4.0, 5.0, 4.0, 3.0, 6.0]);
        candidate
            .add_observations(&data, &vec![1.0; data.len()])
            .unwrap();

        let total: f64 = (0..400)
            .map(|k| {
                candidate
                    .joint_log_marginal_likelihood(&DVector::from_vec(vec![k as f64]))
                    .unwrap()
                    .exp()
            })
            .sum();
        assert::close(total, 1.0, 1e-8);
    }

    #[test]
    fn posterior_mean_tracks_the_counts() {
        let mut candidate = PoissonCandidate::new(1, DataType::Integer);
        let data: Vec<DVector<f64>> = (0..300)
            .map(|i| DVector::from_vec(vec![if i % 2 == 0 { 7.0 } else { 9.0 }]))
            .collect();
        candidate
            .add_observations(&data, &vec![1.0; data.len()])
            .unwrap();
        assert::close(candidate.marginal_likelihood_mean()[0], 8.0, 0.1);
        assert_eq!(candidate.marginal_likelihood_mode()[0], 7.0);
    }

    #[test]
    fn decay_discounts_old_counts() {
        let mut candidate = PoissonCandidate::new(1, DataType::Integer);
        let old = counts(&[20.0; 50]);
        candidate
            .add_observations(&old, &vec![1.0; old.len()])
            .unwrap();
        candidate.propagate_forward_by_time(1.0e4, 0.01);

        let new = counts(&[2.0; 10]);
        candidate
            .add_observations(&new, &vec![1.0; new.len()])
            .unwrap();
        assert::close(candidate.marginal_likelihood_mean()[0], 2.0, 0.5);
    }

    #[test]
    fn persists_and_restores_identically() {
        let mut candidate = PoissonCandidate::with_prior(2, DataType::Integer, 2.0, 0.5).unwrap();
        let data = vec![
            DVector::from_vec(vec![1.0, 10.0]),
            DVector::from_vec(vec![3.0, 12.0]),
        ];
        candidate.add_observations(&data, &[1.0, 0.25]).unwrap();

        let mut writer = DocumentWriter::new("state");
        candidate.persist(&mut writer);
        let doc = writer.finish();

        let params = RestoreParams::default();
        let mut reader = DocumentReader::new(&doc);
        let restored = PoissonCandidate::restore(2, DataType::Integer, &params, &mut reader)
            .expect("well-formed state restores");

        let probe = DVector::from_vec(vec![2.0, 11.0]);
        assert_eq!(
            candidate.joint_log_marginal_likelihood(&probe).unwrap().to_bits(),
            restored.joint_log_marginal_likelihood(&probe).unwrap().to_bits()
        );
    }
}
