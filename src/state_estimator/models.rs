pub mod dynamic;
pub mod measurement;

use crate::error::Result;
use nalgebra::{DMatrix, DVector};

/// Transition model: `f` propagates the state `ts` time units, `F` is its
/// Jacobian and `Q` the process noise covariance over the same interval.
pub trait DynamicModel {
    fn f(&self, x: &DVector<f64>, ts: f64) -> Result<DVector<f64>>;
    fn F(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>>;
    fn Q(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>>;
}

/// Sensor model with measurement dimension `m`.
///
/// `Context` carries whatever the sensor needs to know about the conditions a
/// measurement was taken under (sensor pose, operating mode, ...). The filter
/// passes it through untouched.
pub trait MeasurementModel {
    type Context;

    fn m(&self) -> usize;
    fn h(&self, x: &DVector<f64>, sensor_state: Option<&Self::Context>) -> Result<DVector<f64>>;
    fn H(&self, x: &DVector<f64>, sensor_state: Option<&Self::Context>) -> Result<DMatrix<f64>>;
    fn R(
        &self,
        x: &DVector<f64>,
        sensor_state: Option<&Self::Context>,
        z: Option<&DVector<f64>>,
    ) -> Result<DMatrix<f64>>;

    /// Difference between a measurement and a predicted measurement.
    /// Models with angular components wrap them here.
    fn residual(&self, z: &DVector<f64>, zbar: &DVector<f64>) -> DVector<f64> {
        z - zbar
    }
}

impl<'a, D: DynamicModel + ?Sized> DynamicModel for &'a D {
    fn f(&self, x: &DVector<f64>, ts: f64) -> Result<DVector<f64>> {
        (**self).f(x, ts)
    }
    fn F(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>> {
        (**self).F(x, ts)
    }
    fn Q(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>> {
        (**self).Q(x, ts)
    }
}

impl<'a, M: MeasurementModel + ?Sized> MeasurementModel for &'a M {
    type Context = M::Context;

    fn m(&self) -> usize {
        (**self).m()
    }
    fn h(&self, x: &DVector<f64>, sensor_state: Option<&Self::Context>) -> Result<DVector<f64>> {
        (**self).h(x, sensor_state)
    }
    fn H(&self, x: &DVector<f64>, sensor_state: Option<&Self::Context>) -> Result<DMatrix<f64>> {
        (**self).H(x, sensor_state)
    }
    fn R(
        &self,
        x: &DVector<f64>,
        sensor_state: Option<&Self::Context>,
        z: Option<&DVector<f64>>,
    ) -> Result<DMatrix<f64>> {
        (**self).R(x, sensor_state, z)
    }
    fn residual(&self, z: &DVector<f64>, zbar: &DVector<f64>) -> DVector<f64> {
        (**self).residual(z, zbar)
    }
}
