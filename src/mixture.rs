//! One-of-N mixture engine.
//!
//! Holds N competing candidate models and an unnormalized log-posterior weight
//! over "which candidate is correct," updated by sequential Bayesian model
//! averaging: each batch is scored under every candidate's pre-update
//! posterior, the scores are added to the log-weights, and only then do the
//! candidates absorb the batch. Normalization is deferred to query time and
//! cached; everything stays in log space.

use std::cell::OnceCell;
use std::fmt;

use itertools::izip;
use log::{debug, warn};
use nalgebra::DVector;
use rand::Rng;
use rv::misc::{logsumexp, pflips};

use crate::candidates::{CandidateModel, DataType};
use crate::error::MixtureError;
use crate::persist::{fmt_f64, StateWriter};

/// Cap on how far below the leading hypothesis any log-weight may fall.
///
/// The floor keeps every weight finite so a hypothesis written off by one
/// regime can recover when the stream shifts back. At `exp(-300)` a floored
/// hypothesis contributes nothing measurable to queries but climbs back in a
/// handful of batches once it starts explaining the data.
pub const MAX_LOG_WEIGHT_SPREAD: f64 = 300.0;

/// When and how aggressively to drop moribund hypotheses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PruneOptions {
    /// Normalized weight (probability scale) below which a hypothesis is
    /// considered moribund.
    pub min_weight: f64,
    /// Number of consecutive batches a hypothesis must stay moribund before
    /// it is dropped. Clamped to at least 1.
    pub patience: u32,
}

impl PruneOptions {
    pub fn new(min_weight: f64, patience: u32) -> Self {
        Self {
            min_weight,
            patience: patience.max(1),
        }
    }

    /// Never prune anything.
    pub fn disabled() -> Self {
        Self {
            min_weight: 0.0,
            patience: u32::MAX,
        }
    }
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            min_weight: 1e-6,
            patience: 10,
        }
    }
}

/// One candidate and its bookkeeping.
pub(crate) struct Hypothesis {
    pub(crate) model: Box<dyn CandidateModel>,
    pub(crate) log_weight: f64,
    pub(crate) below_floor: u32,
}

impl Hypothesis {
    pub(crate) fn new(model: Box<dyn CandidateModel>, log_weight: f64) -> Self {
        Self {
            model,
            log_weight,
            below_floor: 0,
        }
    }
}

impl Clone for Hypothesis {
    fn clone(&self) -> Self {
        Self {
            model: self.model.boxed_clone(),
            log_weight: self.log_weight,
            below_floor: self.below_floor,
        }
    }
}

impl fmt::Debug for Hypothesis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hypothesis")
            .field("type", &self.model.type_tag())
            .field("log_weight", &self.log_weight)
            .finish()
    }
}

/// The one-of-N prior over candidate distribution families.
///
/// Not internally synchronized; one engine per logical stream. Constructed
/// through [`crate::factory::OneOfNPriorFactory`], which guarantees at least
/// one candidate and a consistent dimension.
#[derive(Clone)]
pub struct OneOfNMixture {
    dimension: usize,
    data_type: DataType,
    decay_rate: f64,
    hypotheses: Vec<Hypothesis>,
    prune: PruneOptions,
    normalized: OnceCell<Vec<f64>>,
}

impl OneOfNMixture {
    pub(crate) fn from_parts(
        dimension: usize,
        data_type: DataType,
        decay_rate: f64,
        hypotheses: Vec<Hypothesis>,
        prune: PruneOptions,
    ) -> Self {
        Self {
            dimension,
            data_type,
            decay_rate,
            hypotheses,
            prune,
            normalized: OnceCell::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    /// Number of surviving hypotheses.
    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    pub fn prune_options(&self) -> PruneOptions {
        self.prune
    }

    pub fn set_prune_options(&mut self, prune: PruneOptions) {
        self.prune = prune;
    }

    /// Type tags of the surviving hypotheses, in order.
    pub fn type_tags(&self) -> Vec<&'static str> {
        self.hypotheses.iter().map(|h| h.model.type_tag()).collect()
    }

    /// The surviving candidates, in order.
    pub fn candidates(&self) -> impl Iterator<Item = &dyn CandidateModel> {
        self.hypotheses.iter().map(|h| h.model.as_ref())
    }

    /// Raw unnormalized log-weights, in candidate order.
    pub fn log_weights(&self) -> Vec<f64> {
        self.hypotheses.iter().map(|h| h.log_weight).collect()
    }

    /// Posterior probability of each hypothesis; sums to one.
    pub fn normalized_weights(&self) -> Vec<f64> {
        self.normalized_log_weights()
            .iter()
            .map(|w| w.exp())
            .collect()
    }

    fn normalized_log_weights(&self) -> &[f64] {
        self.normalized.get_or_init(|| {
            let ws = self.log_weights();
            let z = logsumexp(&ws);
            ws.into_iter().map(|w| w - z).collect()
        })
    }

    fn invalidate_weight_cache(&mut self) {
        self.normalized.take();
    }

    fn leader(&self) -> usize {
        self.hypotheses
            .iter()
            .enumerate()
            .max_by(|a, b| {
                a.1.log_weight
                    .partial_cmp(&b.1.log_weight)
                    .expect("log-weights stay finite")
            })
            .map(|(i, _)| i)
            .expect("engine holds at least one hypothesis")
    }

    /// Fold a weighted observation batch into the mixture.
    ///
    /// Every point is validated before anything mutates, so a failed call
    /// leaves the engine untouched. Each hypothesis is scored on the batch
    /// under its pre-update posterior and only then updated; doing it the
    /// other way round double-counts the batch and is not a valid sequential
    /// Bayesian update.
    pub fn add_observations(
        &mut self,
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
            if point.len() != self.dimension {
                return Err(MixtureError::DimensionMismatch {
                    expected: self.dimension,
                    got: point.len(),
                });
            }
        }
        if points.is_empty() {
            return Ok(());
        }

        for hypothesis in &mut self.hypotheses {
            let mut batch_ll = 0.0;
            for (point, &w) in izip!(points, weights) {
                if !(w > 0.0) {
                    continue;
                }
                let ll = hypothesis.model.joint_log_marginal_likelihood(point)?;
                batch_ll += w * ll;
            }
            if batch_ll.is_nan() {
                batch_ll = f64::NEG_INFINITY;
            }
            hypothesis.log_weight += batch_ll;
            hypothesis.model.add_observations(points, weights)?;
        }

        self.rebalance_weights();
        self.invalidate_weight_cache();
        self.prune_once();
        Ok(())
    }

    /// Re-center the log-weights on the leader and clamp the spread so every
    /// weight stays finite over an unbounded stream.
    fn rebalance_weights(&mut self) {
        let max = self
            .hypotheses
            .iter()
            .map(|h| h.log_weight)
            .fold(f64::NEG_INFINITY, f64::max);

        if !max.is_finite() {
            // Every candidate called the whole batch impossible. Keep the
            // engine alive on a flat distribution rather than poisoning it.
            warn!("all hypotheses report an impossible batch; resetting weights to uniform");
            let uniform = -(self.hypotheses.len() as f64).ln();
            for hypothesis in &mut self.hypotheses {
                hypothesis.log_weight = uniform;
            }
            return;
        }

        for hypothesis in &mut self.hypotheses {
            hypothesis.log_weight =
                (hypothesis.log_weight - max).max(-MAX_LOG_WEIGHT_SPREAD);
        }
    }

    /// Model-averaged log density of `point`.
    ///
    /// `-inf` means no surviving candidate puts mass on the point; that is a
    /// signal for the caller, not an error, and is never NaN.
    pub fn joint_log_marginal_likelihood(
        &self,
        point: &DVector<f64>,
    ) -> Result<f64, MixtureError> {
        if point.len() != self.dimension {
            return Err(MixtureError::DimensionMismatch {
                expected: self.dimension,
                got: point.len(),
            });
        }

        let mut terms = Vec::with_capacity(self.hypotheses.len());
        for (hypothesis, &weight) in izip!(&self.hypotheses, self.normalized_log_weights()) {
            let ll = hypothesis.model.joint_log_marginal_likelihood(point)?;
            if ll.is_finite() {
                terms.push(weight + ll);
            }
        }
        if terms.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(logsumexp(&terms))
    }

    /// Age every candidate and flatten the hypothesis distribution toward
    /// uniform; confidence in model identity decays along with the evidence
    /// when the process is non-stationary. `interval <= 0` is a no-op.
    pub fn propagate_forward_by_time(&mut self, interval: f64) {
        if !(interval > 0.0) || self.decay_rate <= 0.0 {
            return;
        }
        let alpha = (-self.decay_rate * interval).exp();
        let ws = self.log_weights();
        let z = logsumexp(&ws);
        for hypothesis in &mut self.hypotheses {
            // Scaling normalized log-weights contracts them toward 0, which
            // after renormalization is the uniform distribution.
            hypothesis.log_weight = (hypothesis.log_weight - z) * alpha;
            hypothesis
                .model
                .propagate_forward_by_time(interval, self.decay_rate);
        }
        self.invalidate_weight_cache();
    }

    /// Weighted combination of the candidate predictive means.
    pub fn marginal_likelihood_mean(&self) -> DVector<f64> {
        let mut mean = DVector::zeros(self.dimension);
        for (hypothesis, &weight) in izip!(&self.hypotheses, self.normalized_log_weights()) {
            mean += hypothesis.model.marginal_likelihood_mean() * weight.exp();
        }
        mean
    }

    /// Mode of the currently leading hypothesis.
    pub fn marginal_likelihood_mode(&self) -> DVector<f64> {
        self.hypotheses[self.leader()].model.marginal_likelihood_mode()
    }

    /// Draw `n` points from the model-averaged predictive.
    pub fn sample_marginal_likelihood<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<DVector<f64>> {
        let probabilities = self.normalized_weights();
        pflips(&probabilities, n, rng)
            .into_iter()
            .flat_map(|i| self.hypotheses[i].model.sample(1, &mut *rng))
            .collect()
    }

    /// Drop hypotheses that have stayed below the prune threshold for the
    /// configured number of consecutive batches. The leader always survives.
    fn prune_once(&mut self) {
        if self.hypotheses.len() <= 1 {
            return;
        }

        let ws = self.log_weights();
        let z = logsumexp(&ws);
        let leader = self.leader();
        for (i, hypothesis) in self.hypotheses.iter_mut().enumerate() {
            let probability = (ws[i] - z).exp();
            if probability < self.prune.min_weight && i != leader {
                hypothesis.below_floor += 1;
            } else {
                hypothesis.below_floor = 0;
            }
        }

        let patience = self.prune.patience.max(1);
        let before = self.hypotheses.len();
        self.hypotheses.retain(|h| h.below_floor < patience);
        if self.hypotheses.len() < before {
            debug!(
                "pruned {} moribund hypothesis(es); {} remain",
                before - self.hypotheses.len(),
                self.hypotheses.len()
            );
            // Eager renormalization after removal.
            let ws = self.log_weights();
            let z = logsumexp(&ws);
            for hypothesis in &mut self.hypotheses {
                hypothesis.log_weight -= z;
            }
            self.invalidate_weight_cache();
        }
    }

    /// Write the engine's full state into the current node. The candidate
    /// `state` sub-documents are opaque here; only the matching family can
    /// interpret them.
    pub fn persist(&self, writer: &mut dyn StateWriter) {
        writer.write_field("decay_rate", &fmt_f64(self.decay_rate));
        writer.write_field("data_type", self.data_type.as_str());
        for hypothesis in &self.hypotheses {
            writer.open_node("candidate");
            writer.write_field("type", hypothesis.model.type_tag());
            writer.write_field("log_weight", &fmt_f64(hypothesis.log_weight));
            writer.open_node("state");
            hypothesis.model.persist(writer);
            writer.close_node();
            writer.close_node();
        }
    }
}

impl fmt::Debug for OneOfNMixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneOfNMixture")
            .field("dimension", &self.dimension)
            .field("data_type", &self.data_type)
            .field("decay_rate", &self.decay_rate)
            .field("hypotheses", &self.hypotheses)
            .finish()
    }
}
