//! Log-normal candidate: the Normal-Gamma machinery applied to `ln x`.
//!
//! Support is the strictly positive orthant. Any point with a non-positive
//! coordinate is outside the support, so queries report `-inf` and updates
//! discard the point; that asymmetry is what lets this family lose weight
//! quickly when the stream is not actually positive.

use itertools::izip;
use log::debug;
use nalgebra::DVector;
use rand::RngCore;
use rv::data::DataOrSuffStat;
use rv::dist::Gaussian;
use rv::data::GaussianSuffStat;
use rv::traits::{ConjugatePrior, Sampleable};

use super::moments::WeightedMoments;
use super::normal::{
    check_batch, check_dimension, persist_gaussian_fields, read_gaussian_fields, NormalGammaParams,
};
use super::{CandidateModel, DataType};
use crate::error::MixtureError;
use crate::factory::RestoreParams;
use crate::persist::{StateReader, StateWriter};

pub const TYPE_TAG: &str = "log-normal";

#[derive(Clone, Debug)]
pub struct LogNormalCandidate {
    data_type: DataType,
    prior: NormalGammaParams,
    moments: WeightedMoments,
}

impl LogNormalCandidate {
    pub fn new(dimension: usize, data_type: DataType) -> Self {
        Self {
            data_type,
            prior: NormalGammaParams::default(),
            moments: WeightedMoments::new(dimension),
        }
    }

    /// Override the per-axis hyperparameters on the log scale.
    pub fn with_prior(
        dimension: usize,
        data_type: DataType,
        m: f64,
        r: f64,
        s: f64,
        v: f64,
    ) -> Option<Self> {
        Some(Self {
            data_type,
            prior: NormalGammaParams::new(m, r, s, v)?,
            moments: WeightedMoments::new(dimension),
        })
    }

    fn in_support(point: &DVector<f64>) -> bool {
        point.iter().all(|&x| x > 0.0)
    }

    fn log_point(point: &DVector<f64>) -> DVector<f64> {
        point.map(f64::ln)
    }

    fn posterior_axis(&self, i: usize) -> rv::dist::NormalGamma {
        super::normal::gaussian_posterior_axis(&self.prior, &self.moments, i)
    }

    pub(crate) fn restore(
        dimension: usize,
        data_type: DataType,
        _params: &RestoreParams,
        reader: &mut dyn StateReader,
    ) -> Option<Box<dyn CandidateModel>> {
        let (prior, moments) = read_gaussian_fields(dimension, reader)?;
        Some(Box::new(Self {
            data_type,
            prior,
            moments,
        }))
    }
}

impl CandidateModel for LogNormalCandidate {
    fn dimension(&self) -> usize {
        self.moments.dimension()
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
            moments: WeightedMoments::new(self.dimension()),
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
            if !Self::in_support(point) {
                debug!("log-normal candidate discarding a non-positive observation");
                continue;
            }
            self.moments.observe(&Self::log_point(point), w);
        }
        Ok(())
    }

    fn joint_log_marginal_likelihood(&self, point: &DVector<f64>) -> Result<f64, MixtureError> {
        check_dimension(self.dimension(), point)?;
        if !Self::in_support(point) {
            return Ok(f64::NEG_INFINITY);
        }
        let empty = GaussianSuffStat::new();
        let stat: DataOrSuffStat<f64, Gaussian> = DataOrSuffStat::SuffStat(&empty);
        let mut total = 0.0;
        for i in 0..self.dimension() {
            // Density in x space carries the 1/x change-of-variables term.
            let y = point[i].ln();
            total += self.posterior_axis(i).ln_pp(&y, &stat) - y;
        }
        Ok(total)
    }

    fn propagate_forward_by_time(&mut self, interval: f64, decay_rate: f64) {
        if !(interval > 0.0) || decay_rate <= 0.0 {
            return;
        }
        self.moments.age((-decay_rate * interval).exp());
    }

    fn marginal_likelihood_mean(&self) -> DVector<f64> {
        // Median of the predictive; the heavy-tailed mean need not exist.
        DVector::from_fn(self.dimension(), |i, _| self.posterior_axis(i).m().exp())
    }

    fn marginal_likelihood_mode(&self) -> DVector<f64> {
        DVector::from_fn(self.dimension(), |i, _| self.posterior_axis(i).m().exp())
    }

    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<DVector<f64>> {
        let mut rng = rng;
        (0..n)
            .map(|_| {
                DVector::from_fn(self.dimension(), |i, _| {
                    let gaussian: Gaussian = self.posterior_axis(i).draw(&mut rng);
                    let y: f64 = gaussian.draw(&mut rng);
                    y.exp()
                })
            })
            .collect()
    }

    fn persist(&self, writer: &mut dyn StateWriter) {
        persist_gaussian_fields(&self.prior, &self.moments, writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::normal::NormalCandidate;

    #[test]
    fn non_positive_points_are_out_of_support() {
        let candidate = LogNormalCandidate::new(2, DataType::Continuous);
        let bad = DVector::from_vec(vec![1.0, -0.5]);
        let ll = candidate.joint_log_marginal_likelihood(&bad).unwrap();
        assert!(ll.is_infinite() && ll < 0.0);
        assert!(!ll.is_nan());

        let good = DVector::from_vec(vec![1.0, 0.5]);
        assert!(candidate
            .joint_log_marginal_likelihood(&good)
            .unwrap()
            .is_finite());
    }

    #[test]
    fn matches_normal_candidate_on_the_log_scale() {
        let mut lognormal = LogNormalCandidate::new(1, DataType::Continuous);
        let mut normal = NormalCandidate::new(1, DataType::Continuous);

        let xs = [0.5, 1.0, 1.5, 2.0, 4.0, 8.0];
        let points: Vec<DVector<f64>> = xs.iter().map(|&x| DVector::from_vec(vec![x])).collect();
        let logs: Vec<DVector<f64>> = xs
            .iter()
            .map(|&x| DVector::from_vec(vec![x.ln()]))
            .collect();
        let ws = vec![1.0; xs.len()];
        lognormal.add_observations(&points, &ws).unwrap();
        normal.add_observations(&logs, &ws).unwrap();

        for probe in [0.7, 1.3, 5.0] {
            let direct = lognormal
                .joint_log_marginal_likelihood(&DVector::from_vec(vec![probe]))
                .unwrap();
            let via_log = normal
                .joint_log_marginal_likelihood(&DVector::from_vec(vec![probe.ln()]))
                .unwrap()
                - probe.ln();
            assert::close(direct, via_log, 1e-12);
        }
    }

    #[test]
    fn updates_skip_points_outside_the_support() {
        let mut seen_bad = LogNormalCandidate::new(1, DataType::Continuous);
        let mut clean = LogNormalCandidate::new(1, DataType::Continuous);

        let mixed = vec![
            DVector::from_vec(vec![2.0]),
            DVector::from_vec(vec![-1.0]),
            DVector::from_vec(vec![3.0]),
        ];
        seen_bad
            .add_observations(&mixed, &[1.0, 1.0, 1.0])
            .unwrap();
        clean
            .add_observations(&[mixed[0].clone(), mixed[2].clone()], &[1.0, 1.0])
            .unwrap();

        let probe = DVector::from_vec(vec![2.5]);
        assert_eq!(
            seen_bad.joint_log_marginal_likelihood(&probe).unwrap().to_bits(),
            clean.joint_log_marginal_likelihood(&probe).unwrap().to_bits()
        );
    }

    #[test]
    fn samples_stay_positive() {
        use rand::SeedableRng;
        use rand_xoshiro::Xoshiro256PlusPlus;

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let mut candidate = LogNormalCandidate::new(1, DataType::Continuous);
        let data: Vec<DVector<f64>> = [1.0, 1.2, 0.8, 1.1]
            .iter()
            .map(|&x| DVector::from_vec(vec![x]))
            .collect();
        candidate
            .add_observations(&data, &vec![1.0; data.len()])
            .unwrap();
        for draw in candidate.sample(500, &mut rng) {
            assert!(draw[0] > 0.0);
        }
    }
}
