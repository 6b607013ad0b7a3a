use thiserror::Error;

/// Call-scoped contract violations. None of these is fatal to the engine;
/// the failing call leaves the engine state untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MixtureError {
    /// An observation's dimension disagrees with the engine's.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A weighted batch paired a different number of points and weights.
    #[error("batch pairs {points} points with {weights} weights")]
    LengthMismatch { points: usize, weights: usize },
}
