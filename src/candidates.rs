//! Candidate distribution families.
//!
//! A candidate is one hypothesis about how the observed stream is distributed.
//! Candidates own their sufficient statistics, update them online under
//! fractional observation weights, age them under time decay, and answer
//! posterior-predictive log-density queries. The mixture engine treats them
//! purely through the [`CandidateModel`] capability and a string type tag used
//! for persistence dispatch.

use std::collections::BTreeMap;
use std::fmt::Debug;

use log::warn;
use nalgebra::DVector;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::MixtureError;
use crate::factory::RestoreParams;
use crate::persist::{StateReader, StateWriter};

pub mod lognormal;
pub mod moments;
pub mod normal;
pub mod poisson;

/// Nature of the observed data, persisted alongside the model state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Discrete,
    Integer,
    Continuous,
    Mixed,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Discrete => "discrete",
            DataType::Integer => "integer",
            DataType::Continuous => "continuous",
            DataType::Mixed => "mixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discrete" => Some(DataType::Discrete),
            "integer" => Some(DataType::Integer),
            "continuous" => Some(DataType::Continuous),
            "mixed" => Some(DataType::Mixed),
            _ => None,
        }
    }
}

/// Capability set every hypothesis family implements.
///
/// Implementations are exclusively owned by one engine, are never shared, and
/// must keep `joint_log_marginal_likelihood` free of NaN: out-of-support
/// points report `f64::NEG_INFINITY`.
pub trait CandidateModel: Debug {
    /// Dimension of the observations this candidate models.
    fn dimension(&self) -> usize;

    /// Data-type tag this candidate was built for.
    fn data_type(&self) -> DataType;

    /// Stable tag identifying the family in persisted state.
    fn type_tag(&self) -> &'static str;

    /// A fresh instance with the same hyperparameters and no evidence.
    fn non_informative(&self) -> Box<dyn CandidateModel>;

    fn boxed_clone(&self) -> Box<dyn CandidateModel>;

    /// Fold a weighted batch into the sufficient statistics.
    fn add_observations(
        &mut self,
        points: &[DVector<f64>],
        weights: &[f64],
    ) -> Result<(), MixtureError>;

    /// Log posterior-predictive density of `point` under the current
    /// statistics. `-inf` for out-of-support points is legitimate.
    fn joint_log_marginal_likelihood(&self, point: &DVector<f64>) -> Result<f64, MixtureError>;

    /// Discount accumulated evidence by `exp(-decay_rate * interval)`.
    fn propagate_forward_by_time(&mut self, interval: f64, decay_rate: f64);

    /// Point estimate of the predictive location.
    fn marginal_likelihood_mean(&self) -> DVector<f64>;

    /// Mode of the predictive density.
    fn marginal_likelihood_mode(&self) -> DVector<f64>;

    /// Draw `n` points from the posterior predictive.
    fn sample(&self, n: usize, rng: &mut dyn RngCore) -> Vec<DVector<f64>>;

    /// Write the candidate's state into the current node.
    fn persist(&self, writer: &mut dyn StateWriter);
}

/// Restores one candidate from the reader positioned at its `state` node.
pub type CandidateRestoreFn = fn(
    usize,
    DataType,
    &RestoreParams,
    &mut dyn StateReader,
) -> Option<Box<dyn CandidateModel>>;

/// Type-tag dispatch table used when reconstructing persisted engines.
#[derive(Clone, Debug)]
pub struct CandidateRegistry {
    restorers: BTreeMap<&'static str, CandidateRestoreFn>,
}

impl CandidateRegistry {
    /// A registry that recognizes nothing. Useful for hosts that only ever
    /// restore their own families.
    pub fn empty() -> Self {
        Self {
            restorers: BTreeMap::new(),
        }
    }

    /// A registry preloaded with the built-in families.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(normal::TYPE_TAG, normal::NormalCandidate::restore);
        registry.register(lognormal::TYPE_TAG, lognormal::LogNormalCandidate::restore);
        registry.register(poisson::TYPE_TAG, poisson::PoissonCandidate::restore);
        registry
    }

    pub fn register(&mut self, tag: &'static str, restore: CandidateRestoreFn) {
        self.restorers.insert(tag, restore);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.restorers.contains_key(tag)
    }

    /// Dispatch a nested restore. `None` for unknown tags so a stale document
    /// fails the whole reconstruction rather than half-building an engine.
    pub fn restore(
        &self,
        tag: &str,
        dimension: usize,
        data_type: DataType,
        params: &RestoreParams,
        reader: &mut dyn StateReader,
    ) -> Option<Box<dyn CandidateModel>> {
        match self.restorers.get(tag) {
            Some(restore) => restore(dimension, data_type, params, reader),
            None => {
                warn!("unrecognized candidate type tag '{tag}'");
                None
            }
        }
    }
}

impl Default for CandidateRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_tags_round_trip() {
        for dt in [
            DataType::Discrete,
            DataType::Integer,
            DataType::Continuous,
            DataType::Mixed,
        ] {
            assert_eq!(DataType::from_str(dt.as_str()), Some(dt));
        }
        assert_eq!(DataType::from_str("fancy"), None);
    }

    #[test]
    fn default_registry_knows_builtin_families() {
        let registry = CandidateRegistry::with_defaults();
        assert!(registry.contains("normal"));
        assert!(registry.contains("log-normal"));
        assert!(registry.contains("poisson"));
        assert!(!registry.contains("multinomial"));
        assert!(!CandidateRegistry::empty().contains("normal"));
    }
}
