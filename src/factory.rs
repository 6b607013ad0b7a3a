//! Construction and reconstruction of one-of-N mixture engines.
//!
//! Both entry points report failure by returning `None`: a half-built engine
//! must never escape, so restore in particular is all-or-nothing.

use log::warn;

use crate::candidates::{CandidateModel, CandidateRegistry, DataType};
use crate::mixture::{Hypothesis, OneOfNMixture, PruneOptions};
use crate::persist::{parse_f64, StateReader};

/// Everything a restore needs beyond the document itself: which candidate
/// families are recognized, and the pruning thresholds the reconstructed
/// engine should run with (they are operating policy, not persisted state).
#[derive(Clone, Debug)]
pub struct RestoreParams {
    pub registry: CandidateRegistry,
    pub prune: PruneOptions,
}

impl RestoreParams {
    pub fn new(registry: CandidateRegistry) -> Self {
        Self {
            registry,
            prune: PruneOptions::default(),
        }
    }
}

impl Default for RestoreParams {
    fn default() -> Self {
        Self::new(CandidateRegistry::with_defaults())
    }
}

/// Factory for one-of-N mixture engines.
pub struct OneOfNPriorFactory;

impl OneOfNPriorFactory {
    /// Build a non-informative engine from candidate templates.
    ///
    /// Every template is cloned into its non-informative form and handed an
    /// equal initial log-weight of `-ln(N)`. `None` if the template list is
    /// empty, the dimension is zero, the decay rate is not a finite
    /// non-negative number, or any template disagrees with the requested
    /// dimension or data type.
    pub fn non_informative(
        dimension: usize,
        data_type: DataType,
        decay_rate: f64,
        templates: &[Box<dyn CandidateModel>],
    ) -> Option<OneOfNMixture> {
        if dimension == 0 || templates.is_empty() {
            return None;
        }
        if !decay_rate.is_finite() || decay_rate < 0.0 {
            return None;
        }
        for template in templates {
            if template.dimension() != dimension || template.data_type() != data_type {
                return None;
            }
        }

        let initial = -(templates.len() as f64).ln();
        let hypotheses = templates
            .iter()
            .map(|template| Hypothesis::new(template.non_informative(), initial))
            .collect();
        Some(OneOfNMixture::from_parts(
            dimension,
            data_type,
            decay_rate,
            hypotheses,
            PruneOptions::default(),
        ))
    }

    /// Reconstruct an engine from its persisted document.
    ///
    /// The reader must be positioned at the engine's root node. Any defect —
    /// missing or unparseable header fields, an unregistered candidate tag, a
    /// failed nested restore — abandons the whole reconstruction.
    pub fn restore(
        dimension: usize,
        params: &RestoreParams,
        reader: &mut dyn StateReader,
    ) -> Option<OneOfNMixture> {
        if dimension == 0 {
            return None;
        }

        let mut decay_rate = None;
        let mut data_type = None;
        let mut hypotheses: Vec<Hypothesis> = Vec::new();

        if !reader.enter() {
            warn!("one-of-n state document has no content");
            return None;
        }
        let mut ok = true;
        loop {
            let name = reader.name().to_owned();
            match name.as_str() {
                "decay_rate" => {
                    decay_rate = reader.value().and_then(parse_f64);
                    if decay_rate.is_none() {
                        ok = false;
                    }
                }
                "data_type" => {
                    data_type = reader.value().and_then(DataType::from_str);
                    if data_type.is_none() {
                        ok = false;
                    }
                }
                "candidate" => {
                    // Header fields precede the candidate list in any
                    // document this engine wrote.
                    match data_type {
                        Some(dt) => {
                            match Self::restore_candidate(dimension, dt, params, reader) {
                                Some(hypothesis) => hypotheses.push(hypothesis),
                                None => ok = false,
                            }
                        }
                        None => ok = false,
                    }
                }
                _ => {}
            }
            if !ok || !reader.advance() {
                break;
            }
        }
        reader.leave();

        if !ok {
            warn!("malformed one-of-n state document");
            return None;
        }
        let decay_rate = decay_rate?;
        let data_type = data_type?;
        if hypotheses.is_empty() || !decay_rate.is_finite() || decay_rate < 0.0 {
            return None;
        }
        Some(OneOfNMixture::from_parts(
            dimension,
            data_type,
            decay_rate,
            hypotheses,
            params.prune,
        ))
    }

    /// Restore one `candidate` entry; the reader sits on its node and is left
    /// there.
    fn restore_candidate(
        dimension: usize,
        data_type: DataType,
        params: &RestoreParams,
        reader: &mut dyn StateReader,
    ) -> Option<Hypothesis> {
        let mut tag: Option<String> = None;
        let mut log_weight = None;
        let mut model = None;

        if !reader.enter() {
            return None;
        }
        let mut ok = true;
        loop {
            let name = reader.name().to_owned();
            match name.as_str() {
                "type" => tag = reader.value().map(str::to_owned),
                "log_weight" => log_weight = reader.value().and_then(parse_f64),
                "state" => match &tag {
                    Some(tag) => {
                        match params
                            .registry
                            .restore(tag, dimension, data_type, params, reader)
                        {
                            Some(restored) => model = Some(restored),
                            None => ok = false,
                        }
                    }
                    // The type tag must precede the state it interprets.
                    None => ok = false,
                },
                _ => {}
            }
            if !ok || !reader.advance() {
                break;
            }
        }
        reader.leave();

        if !ok {
            return None;
        }
        let log_weight = log_weight?;
        let model = model?;
        if !log_weight.is_finite() || model.dimension() != dimension {
            return None;
        }
        Some(Hypothesis::new(model, log_weight))
    }
}
