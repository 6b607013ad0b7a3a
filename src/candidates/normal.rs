//! Normal candidate with a Normal-Gamma conjugate prior on every axis.
//!
//! Axes are modeled independently; the posterior predictive on each axis is
//! the Student-t that `rv` derives from the updated Normal-Gamma parameters.

use itertools::izip;
use nalgebra::DVector;
use rand::RngCore;
use rv::data::DataOrSuffStat;
use rv::dist::{Gaussian, NormalGamma};
use rv::data::GaussianSuffStat;
use rv::traits::{ConjugatePrior, Sampleable};

use super::moments::WeightedMoments;
use super::{CandidateModel, DataType};
use crate::error::MixtureError;
use crate::factory::RestoreParams;
use crate::persist::{fmt_scalars, parse_f64, parse_scalars, parse_vector, StateReader, StateWriter};

pub const TYPE_TAG: &str = "normal";

/// Normal-Gamma hyperparameters shared by every axis: location `m`, relative
/// precision `r`, and a Gamma(shape `s`, rate `v`) prior on the precision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct NormalGammaParams {
    pub m: f64,
    pub r: f64,
    pub s: f64,
    pub v: f64,
}

impl NormalGammaParams {
    pub fn new(m: f64, r: f64, s: f64, v: f64) -> Option<Self> {
        let all_finite = m.is_finite() && r.is_finite() && s.is_finite() && v.is_finite();
        (all_finite && r > 0.0 && s > 0.0 && v > 0.0).then_some(Self { m, r, s, v })
    }
}

impl Default for NormalGammaParams {
    fn default() -> Self {
        Self {
            m: 0.0,
            r: 1.0,
            s: 1.0,
            v: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NormalCandidate {
    data_type: DataType,
    prior: NormalGammaParams,
    moments: WeightedMoments,
}

impl NormalCandidate {
    /// A non-informative instance with the default vague prior.
    pub fn new(dimension: usize, data_type: DataType) -> Self {
        Self {
            data_type,
            prior: NormalGammaParams::default(),
            moments: WeightedMoments::new(dimension),
        }
    }

    /// Override the per-axis hyperparameters. `None` if they are not a valid
    /// Normal-Gamma parameterization.
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

    pub(crate) fn from_parts(
        data_type: DataType,
        prior: NormalGammaParams,
        moments: WeightedMoments,
    ) -> Self {
        Self {
            data_type,
            prior,
            moments,
        }
    }

    fn posterior_axis(&self, i: usize) -> NormalGamma {
        gaussian_posterior_axis(&self.prior, &self.moments, i)
    }

    fn axis_log_predictive(&self, i: usize, x: f64) -> f64 {
        let posterior = self.posterior_axis(i);
        let empty = GaussianSuffStat::new();
        let stat: DataOrSuffStat<f64, Gaussian> = DataOrSuffStat::SuffStat(&empty);
        posterior.ln_pp(&x, &stat)
    }

    fn posterior_location(&self) -> DVector<f64> {
        DVector::from_fn(self.dimension(), |i, _| self.posterior_axis(i).m())
    }

    pub(crate) fn restore(
        dimension: usize,
        data_type: DataType,
        _params: &RestoreParams,
        reader: &mut dyn StateReader,
    ) -> Option<Box<dyn CandidateModel>> {
        let (prior, moments) = read_gaussian_fields(dimension, reader)?;
        Some(Box::new(Self::from_parts(data_type, prior, moments)))
    }
}

/// Conjugate posterior on one axis, formed analytically from the weighted
/// moments so fractional evidence and decay fall out for free.
pub(crate) fn gaussian_posterior_axis(
    prior: &NormalGammaParams,
    moments: &WeightedMoments,
    i: usize,
) -> NormalGamma {
    let n = moments.weight();
    let mean = moments.mean()[i];
    let m2 = moments.m2()[i];

    let r = prior.r + n;
    let m = (prior.r * prior.m + n * mean) / r;
    let s = prior.s + 0.5 * n;
    let v = prior.v + 0.5 * m2 + 0.5 * prior.r * n * (mean - prior.m).powi(2) / r;
    NormalGamma::new_unchecked(m, r, s, v)
}

/// Shared restore walk for the Gaussian-flavored families.
pub(crate) fn read_gaussian_fields(
    dimension: usize,
    reader: &mut dyn StateReader,
) -> Option<(NormalGammaParams, WeightedMoments)> {
    let mut prior = None;
    let mut count = None;
    let mut mean = None;
    let mut m2 = None;

    if reader.enter() {
        loop {
            let name = reader.name().to_owned();
            let value = reader.value().map(str::to_owned);
            match (name.as_str(), value) {
                ("prior", Some(v)) => prior = parse_scalars(&v, 4),
                ("count", Some(v)) => count = parse_f64(&v),
                ("mean", Some(v)) => mean = parse_vector(&v, dimension),
                ("m2", Some(v)) => m2 = parse_vector(&v, dimension),
                _ => {}
            }
            if !reader.advance() {
                break;
            }
        }
        reader.leave();
    }

    let p = prior?;
    let prior = NormalGammaParams::new(p[0], p[1], p[2], p[3])?;
    let moments = WeightedMoments::from_parts(count?, mean?, m2?)?;
    Some((prior, moments))
}

pub(crate) fn persist_gaussian_fields(
    prior: &NormalGammaParams,
    moments: &WeightedMoments,
    writer: &mut dyn StateWriter,
) {
    writer.write_field("prior", &fmt_scalars(&[prior.m, prior.r, prior.s, prior.v]));
    moments.persist(writer);
}

impl CandidateModel for NormalCandidate {
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
            self.moments.observe(point, w);
        }
        Ok(())
    }

    fn joint_log_marginal_likelihood(&self, point: &DVector<f64>) -> Result<f64, MixtureError> {
        check_dimension(self.dimension(), point)?;
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
        self.moments.age((-decay_rate * interval).exp());
    }

    fn marginal_likelihood_mean(&self) -> DVector<f64> {
        self.posterior_location()
    }

    fn marginal_likelihood_mode(&self) -> DVector<f64> {
        self.posterior_location()
    }

    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<DVector<f64>> {
        let mut rng = rng;
        (0..n)
            .map(|_| {
                DVector::from_fn(self.dimension(), |i, _| {
                    let gaussian: Gaussian = self.posterior_axis(i).draw(&mut rng);
                    gaussian.draw(&mut rng)
                })
            })
            .collect()
    }

    fn persist(&self, writer: &mut dyn StateWriter) {
        persist_gaussian_fields(&self.prior, &self.moments, writer);
    }
}

pub(crate) fn check_dimension(expected: usize, point: &DVector<f64>) -> Result<(), MixtureError> {
    if point.len() != expected {
        return Err(MixtureError::DimensionMismatch {
            expected,
            got: point.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_batch(
    expected: usize,
    points: &[DVector<f64>],
    weights: &[f64],
) -> Result<(), MixtureError> {
    if points.len() != weights.len() {
        return Err(MixtureError::LengthMismatch {
            points: points.len(),
            weights: weights.len(),
        });
    }
    for point in points {
        check_dimension(expected, point)?;
    }
    Ok(())
}
