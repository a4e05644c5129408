use super::gaussparams::{GaussParamList, GaussParams};
use super::StateEstimator;
use crate::error::{Error, Result};
use itertools::izip;
use log::debug;
use std::iter;

/// Time between consecutive measurements, either fixed or given per step.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingTime {
    Constant(f64),
    PerStep(Vec<f64>),
}

impl From<f64> for SamplingTime {
    fn from(ts: f64) -> Self {
        SamplingTime::Constant(ts)
    }
}

impl From<Vec<f64>> for SamplingTime {
    fn from(ts: Vec<f64>) -> Self {
        SamplingTime::PerStep(ts)
    }
}

impl From<&[f64]> for SamplingTime {
    fn from(ts: &[f64]) -> Self {
        SamplingTime::PerStep(ts.to_vec())
    }
}

impl SamplingTime {
    /// Prediction horizon for each of the `K` steps.
    ///
    /// Without an initial prediction the first horizon is zero, and a
    /// per-step sequence may then hold only the `K - 1` gaps between
    /// measurements.
    pub fn schedule(&self, K: usize, start_with_prediction: bool) -> Result<Vec<f64>> {
        let mut ts_arr = match self {
            SamplingTime::Constant(ts) => vec![*ts; K],
            SamplingTime::PerStep(ts) if ts.len() == K => ts.clone(),
            SamplingTime::PerStep(ts) if !start_with_prediction && ts.len() + 1 == K => {
                iter::once(0.0).chain(ts.iter().copied()).collect()
            }
            SamplingTime::PerStep(ts) => {
                return Err(Error::vector_len("sampling times", K, ts.len()));
            }
        };
        // zero time prediction for no prediction equivalence
        if !start_with_prediction {
            if let Some(first) = ts_arr.first_mut() {
                *first = 0.0;
            }
        }
        Ok(ts_arr)
    }
}

/// Runs the filter over a whole measurement sequence.
///
/// Each step predicts the previous updated state and updates it with `Z[k]`;
/// both are recorded at index `k`. `sensor_states`, when given, must hold one
/// (possibly absent) context per measurement.
pub fn estimate_sequence<S>(
    filter: &S,
    Z: &[S::Measurement],
    init_state: GaussParams,
    ts: impl Into<SamplingTime>,
    sensor_states: Option<&[Option<S::Context>]>,
    start_with_prediction: bool,
) -> Result<(GaussParamList, GaussParamList)>
where
    S: StateEstimator<Params = GaussParams>,
{
    let K = Z.len();
    init_state.check_dims()?;
    let ts_arr = ts.into().schedule(K, start_with_prediction)?;
    if let Some(ss) = sensor_states {
        if ss.len() != K {
            return Err(Error::vector_len("sensor states", K, ss.len()));
        }
    }
    let sensor_state_seq = (0..K).map(|k| sensor_states.and_then(|ss| ss[k].as_ref()));

    let n = init_state.dim();
    let mut pred_list = GaussParamList::allocate(K, n);
    let mut upd_list = GaussParamList::allocate(K, n);

    let mut eststate_upd = init_state;
    for (k, (zk, &tsk, ssk)) in izip!(Z, &ts_arr, sensor_state_seq).enumerate() {
        let eststate_pred = filter.predict(&eststate_upd, tsk)?;
        eststate_upd = filter.update(zk, &eststate_pred, ssk)?;
        pred_list.set(k, eststate_pred)?;
        upd_list.set(k, eststate_upd.clone())?;
    }

    debug!(
        "estimated sequence of {} steps (start_with_prediction = {})",
        K, start_with_prediction
    );
    Ok((pred_list, upd_list))
}
