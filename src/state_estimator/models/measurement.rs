use super::MeasurementModel;
use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Wraps an angle to (-π, π].
pub fn wrap_to_pi(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Direct measurement of the first `dim` states with isotropic noise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartesianPosition {
    sigma_p: f64,
    dim: usize,
}

impl CartesianPosition {
    /// Planar position measurement.
    pub fn new(sigma_p: f64) -> Self {
        Self::with_dim(2, sigma_p)
    }

    pub fn with_dim(dim: usize, sigma_p: f64) -> Self {
        CartesianPosition { sigma_p, dim }
    }

    fn check_state(&self, x: &DVector<f64>) -> Result<()> {
        if x.len() >= self.dim {
            Ok(())
        } else {
            Err(Error::vector_len("position state", self.dim, x.len()))
        }
    }
}

impl MeasurementModel for CartesianPosition {
    type Context = ();

    fn m(&self) -> usize {
        self.dim
    }

    /// Assumes p is the first state
    fn h(&self, x: &DVector<f64>, _sensor_state: Option<&()>) -> Result<DVector<f64>> {
        self.check_state(x)?;
        Ok(x.rows(0, self.dim).into_owned())
    }

    fn H(&self, x: &DVector<f64>, _sensor_state: Option<&()>) -> Result<DMatrix<f64>> {
        self.check_state(x)?;
        Ok(DMatrix::identity(self.dim, x.len()))
    }

    fn R(
        &self,
        _x: &DVector<f64>,
        _sensor_state: Option<&()>,
        _z: Option<&DVector<f64>>,
    ) -> Result<DMatrix<f64>> {
        Ok(DMatrix::<f64>::identity(self.dim, self.dim) * self.sigma_p.powi(2))
    }
}

/// Planar position of the sensor taking a range-bearing measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorPosition {
    pub east: f64,
    pub north: f64,
}

impl SensorPosition {
    pub fn new(east: f64, north: f64) -> Self {
        SensorPosition { east, north }
    }
}

/// Range and bearing to a target whose planar position is the first two states.
///
/// Bearing is `atan2(north, east)` of the relative position, and bearing
/// residuals are wrapped to (-π, π]. A missing `SensorPosition` means the
/// sensor sits at the origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeBearing {
    sigma_r: f64,
    sigma_b: f64,
}

impl RangeBearing {
    pub fn new(sigma_r: f64, sigma_b: f64) -> Self {
        RangeBearing { sigma_r, sigma_b }
    }

    fn relative_position(
        x: &DVector<f64>,
        sensor_state: Option<&SensorPosition>,
    ) -> Result<(f64, f64)> {
        if x.len() < 2 {
            return Err(Error::vector_len("range-bearing state", 2, x.len()));
        }
        let sensor = sensor_state.copied().unwrap_or_default();
        Ok((x[0] - sensor.east, x[1] - sensor.north))
    }
}

impl MeasurementModel for RangeBearing {
    type Context = SensorPosition;

    fn m(&self) -> usize {
        2
    }

    fn h(&self, x: &DVector<f64>, sensor_state: Option<&SensorPosition>) -> Result<DVector<f64>> {
        let (de, dn) = Self::relative_position(x, sensor_state)?;
        Ok(DVector::from_row_slice(&[de.hypot(dn), dn.atan2(de)]))
    }

    fn H(&self, x: &DVector<f64>, sensor_state: Option<&SensorPosition>) -> Result<DMatrix<f64>> {
        let (de, dn) = Self::relative_position(x, sensor_state)?;
        let r2 = de * de + dn * dn;
        if r2 == 0.0 {
            return Err(Error::model("range-bearing Jacobian undefined at the sensor position"));
        }
        let r = r2.sqrt();
        let mut H = DMatrix::zeros(2, x.len());
        H[(0, 0)] = de / r;
        H[(0, 1)] = dn / r;
        H[(1, 0)] = -dn / r2;
        H[(1, 1)] = de / r2;
        Ok(H)
    }

    fn R(
        &self,
        _x: &DVector<f64>,
        _sensor_state: Option<&SensorPosition>,
        _z: Option<&DVector<f64>>,
    ) -> Result<DMatrix<f64>> {
        Ok(DMatrix::from_diagonal(&DVector::from_row_slice(&[
            self.sigma_r.powi(2),
            self.sigma_b.powi(2),
        ])))
    }
    fn residual(&self, z: &DVector<f64>, zbar: &DVector<f64>) -> DVector<f64> {
        let mut v = z - zbar;
        v[1] = wrap_to_pi(v[1]);
        v
    }
}
