pub mod ekf;
pub mod gaussparams;
pub mod models;
pub mod sequence;

pub use gaussparams::{GaussParamList, GaussParams};

use crate::error::Result;

/// Common interface of recursive Bayesian estimators, so that filters built
/// on top (mixtures, data association) can treat them interchangeably.
pub trait StateEstimator {
    type Params;
    type Measurement;
    type Context;

    fn predict(&self, eststate: &Self::Params, ts: f64) -> Result<Self::Params>;

    fn update(
        &self,
        z: &Self::Measurement,
        eststate: &Self::Params,
        sensor_state: Option<&Self::Context>,
    ) -> Result<Self::Params>;

    fn step(
        &self,
        z: &Self::Measurement,
        eststate: &Self::Params,
        ts: f64,
        sensor_state: Option<&Self::Context>,
    ) -> Result<Self::Params> {
        let eststate_pred = self.predict(eststate, ts)?;
        self.update(z, &eststate_pred, sensor_state)
    }

    /// Gaussian estimate of the filter state.
    fn estimate(&self, eststate: Self::Params) -> Result<GaussParams>;

    fn loglikelihood(
        &self,
        z: &Self::Measurement,
        eststate: &Self::Params,
        sensor_state: Option<&Self::Context>,
    ) -> Result<f64>;

    fn gate(
        &self,
        z: &Self::Measurement,
        eststate: &Self::Params,
        gate_size_square: f64,
        sensor_state: Option<&Self::Context>,
    ) -> Result<bool>;
}
