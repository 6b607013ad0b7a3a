//! Online one-of-N Bayesian model averaging over multivariate distribution
//! families.
//!
//! An [`OneOfNMixture`] holds several candidate models of the observed
//! stream, keeps a log-space posterior over which of them is correct, and
//! answers model-averaged likelihood queries for downstream anomaly scoring.
//! Engines are built and reconstructed through [`OneOfNPriorFactory`] and
//! persist themselves through an abstract hierarchical cursor.

pub mod candidates;
pub mod error;
pub mod factory;
pub mod mixture;
pub mod persist;
pub mod utils;

pub use candidates::lognormal::LogNormalCandidate;
pub use candidates::normal::NormalCandidate;
pub use candidates::poisson::PoissonCandidate;
pub use candidates::{CandidateModel, CandidateRegistry, CandidateRestoreFn, DataType};
pub use error::MixtureError;
pub use factory::{OneOfNPriorFactory, RestoreParams};
pub use mixture::{OneOfNMixture, PruneOptions, MAX_LOG_WEIGHT_SPREAD};
pub use persist::{
    DocumentReader, DocumentWriter, StateNode, StateReader, StateWriter,
};
