//! Weighted running moments, one accumulator shared by the Gaussian-flavored
//! families.

use nalgebra::DVector;

use crate::persist::{fmt_f64, fmt_vector, StateWriter};

/// Per-axis weighted mean and centered second moment, accumulated West-style
/// so fractional observation weights and evidence decay both work.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightedMoments {
    weight: f64,
    mean: DVector<f64>,
    m2: DVector<f64>,
}

impl WeightedMoments {
    pub fn new(dimension: usize) -> Self {
        Self {
            weight: 0.0,
            mean: DVector::zeros(dimension),
            m2: DVector::zeros(dimension),
        }
    }

    /// Rebuild from persisted parts, rejecting anything inconsistent.
    pub fn from_parts(weight: f64, mean: DVector<f64>, m2: DVector<f64>) -> Option<Self> {
        if !(weight >= 0.0) || !weight.is_finite() {
            return None;
        }
        if mean.len() != m2.len() || mean.len() == 0 {
            return None;
        }
        if mean.iter().any(|v| !v.is_finite()) || m2.iter().any(|v| !(*v >= 0.0) || !v.is_finite())
        {
            return None;
        }
        Some(Self { weight, mean, m2 })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn m2(&self) -> &DVector<f64> {
        &self.m2
    }

    /// Fold one point in with evidence mass `w`.
    pub fn observe(&mut self, point: &DVector<f64>, w: f64) {
        if !(w > 0.0) {
            return;
        }
        self.weight += w;
        for i in 0..self.mean.len() {
            let delta = point[i] - self.mean[i];
            self.mean[i] += w / self.weight * delta;
            self.m2[i] += w * delta * (point[i] - self.mean[i]);
        }
    }

    /// Shrink the accumulated evidence toward nothing; the location survives,
    /// the mass behind it does not.
    pub fn age(&mut self, factor: f64) {
        let factor = factor.clamp(0.0, 1.0);
        self.weight *= factor;
        self.m2 *= factor;
    }

    pub fn persist(&self, writer: &mut dyn StateWriter) {
        writer.write_field("count", &fmt_f64(self.weight));
        writer.write_field("mean", &fmt_vector(&self.mean));
        writer.write_field("m2", &fmt_vector(&self.m2));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_observation_matches_repetition() {
        let mut once = WeightedMoments::new(2);
        let mut twice = WeightedMoments::new(2);
        let a = DVector::from_vec(vec![1.0, -3.0]);
        let b = DVector::from_vec(vec![4.0, 2.5]);

        once.observe(&a, 2.0);
        once.observe(&b, 2.0);
        twice.observe(&a, 1.0);
        twice.observe(&a, 1.0);
        twice.observe(&b, 1.0);
        twice.observe(&b, 1.0);

        assert::close(once.weight(), twice.weight(), 1e-12);
        for i in 0..2 {
            assert::close(once.mean()[i], twice.mean()[i], 1e-12);
            assert::close(once.m2()[i], twice.m2()[i], 1e-12);
        }
    }

    #[test]
    fn zero_weight_is_ignored() {
        let mut moments = WeightedMoments::new(1);
        moments.observe(&DVector::from_vec(vec![5.0]), 0.0);
        assert_eq!(moments.weight(), 0.0);
        assert_eq!(moments.mean()[0], 0.0);
    }

    #[test]
    fn aging_keeps_location_and_drops_mass() {
        let mut moments = WeightedMoments::new(1);
        for x in [1.0, 2.0, 3.0] {
            moments.observe(&DVector::from_vec(vec![x]), 1.0);
        }
        let mean_before = moments.mean()[0];
        moments.age(0.5);
        assert::close(moments.weight(), 1.5, 1e-12);
        assert::close(moments.mean()[0], mean_before, 1e-12);
        assert::close(moments.m2()[0], 1.0, 1e-12);
    }

    #[test]
    fn from_parts_rejects_bad_state() {
        let mean = DVector::from_vec(vec![0.0]);
        let m2 = DVector::from_vec(vec![1.0]);
        assert!(WeightedMoments::from_parts(1.0, mean.clone(), m2.clone()).is_some());
        assert!(WeightedMoments::from_parts(-1.0, mean.clone(), m2.clone()).is_none());
        assert!(WeightedMoments::from_parts(f64::NAN, mean.clone(), m2.clone()).is_none());
        assert!(
            WeightedMoments::from_parts(1.0, mean, DVector::from_vec(vec![-0.5])).is_none()
        );
    }
}
