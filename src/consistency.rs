use crate::error::Result;

/// Consistency statistics of a filter against measurements and ground truth.
pub trait Consistency {
    type Params;
    type Measurement;
    type Context;
    type GroundTruth;

    /// Normalized innovation squared of `z` against the predicted state.
    fn NIS(
        &self,
        z: &Self::Measurement,
        eststate: &Self::Params,
        sensor_state: Option<&Self::Context>,
    ) -> Result<f64>;

    /// Normalized estimation error squared against the true state.
    fn NEES(&self, eststate: &Self::Params, x_gt: &Self::GroundTruth) -> Result<f64>;
}
