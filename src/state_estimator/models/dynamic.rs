use super::DynamicModel;
use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

fn check_ts(ts: f64) -> Result<()> {
    if ts.is_finite() && ts >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidTimeStep(ts))
    }
}

/// Constant velocity with white-noise acceleration.
///
/// The state is `[p, u]` where position `p` and velocity `u` have the same
/// number of spatial dimensions, so a 1D model has `n = 2` and a planar one
/// `n = 4`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CV {
    // Acceleration noise standard deviation
    sigma_a: f64,
}

impl CV {
    pub fn new(sigma_a: f64) -> Self {
        CV { sigma_a }
    }

    fn spatial_dim(x: &DVector<f64>) -> Result<usize> {
        let n = x.len();
        if n == 0 || n % 2 != 0 {
            let expected = 2 * ((n + 1) / 2).max(1);
            return Err(Error::vector_len("constant velocity state", expected, n));
        }
        Ok(n / 2)
    }
}

impl DynamicModel for CV {
    fn f(&self, x: &DVector<f64>, ts: f64) -> Result<DVector<f64>> {
        check_ts(ts)?;
        let d = Self::spatial_dim(x)?;
        let mut x_next = x.clone();
        let displacement = x.rows(d, d) * ts;
        let mut p = x_next.rows_mut(0, d);
        p += &displacement;
        Ok(x_next)
    }

    fn F(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>> {
        check_ts(ts)?;
        let d = Self::spatial_dim(x)?;
        let n = x.len();
        let mut F = DMatrix::<f64>::identity(n, n);
        F.view_mut((0, d), (d, d))
            .copy_from(&DMatrix::from_diagonal_element(d, d, ts));
        Ok(F)
    }

    fn Q(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>> {
        check_ts(ts)?;
        let d = Self::spatial_dim(x)?;
        let n = x.len();
        let mut Q = DMatrix::zeros(n, n);
        Q.view_mut((0, 0), (d, d))
            .copy_from(&DMatrix::from_diagonal_element(d, d, ts.powi(3) / 3.0));
        Q.view_mut((d, d), (d, d))
            .copy_from(&DMatrix::from_diagonal_element(d, d, ts));
        Q.view_mut((0, d), (d, d))
            .copy_from(&DMatrix::from_diagonal_element(d, d, ts.powi(2) / 2.0));
        Q.view_mut((d, 0), (d, d))
            .copy_from(&DMatrix::from_diagonal_element(d, d, ts.powi(2) / 2.0));
        Q *= self.sigma_a.powi(2);
        Ok(Q)
    }
}

/// Coordinated turn with state `[x, y, u, v, omega]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CT {
    sigma_a: f64,
    sigma_w: f64,
}

impl CT {
    pub fn new(sigma_a: f64, sigma_w: f64) -> Self {
        CT { sigma_a, sigma_w }
    }

    fn check_state(x: &DVector<f64>) -> Result<()> {
        if x.len() == 5 {
            Ok(())
        } else {
            Err(Error::vector_len("coordinated turn state", 5, x.len()))
        }
    }
}

// Computes sin(x)/x
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        1.0 - x.powi(2) / 6.0
    } else {
        x.sin() / x
    }
}

// Computes (1 - cos(x))/x
fn cosc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        x / 2.0 - x.powi(3) / 24.0
    } else {
        (1.0 - x.cos()) / x
    }
}

fn dsinc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        -x / 3.0
    } else {
        (x.cos() - sinc(x)) / x
    }
}

fn dcosc(x: f64) -> f64 {
    if x.abs() < 1e-3 {
        0.5 - x.powi(2) / 8.0
    } else {
        (x.sin() - cosc(x)) / x
    }
}

impl DynamicModel for CT {
    fn f(&self, x: &DVector<f64>, ts: f64) -> Result<DVector<f64>> {
        check_ts(ts)?;
        Self::check_state(x)?;
        let x0 = x[0];
        let y0 = x[1];
        let u0 = x[2];
        let v0 = x[3];
        let omega = x[4];

        let theta = omega * ts;

        let cth = theta.cos();
        let sth = theta.sin();

        let sincth = sinc(theta);
        let coscth = cosc(theta);

        Ok(DVector::from_row_slice(&[
            x0 + ts * u0 * sincth - ts * v0 * coscth,
            y0 + ts * u0 * coscth + ts * v0 * sincth,
            u0 * cth - v0 * sth,
            u0 * sth + v0 * cth,
            omega,
        ]))
    }

    fn F(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>> {
        check_ts(ts)?;
        Self::check_state(x)?;
        let u0 = x[2];
        let v0 = x[3];
        let omega = x[4];

        let theta = ts * omega;

        let sth = theta.sin();
        let cth = theta.cos();

        let sincth = sinc(theta);
        let coscth = cosc(theta);

        let dsincth = dsinc(theta);
        let dcoscth = dcosc(theta);

        #[rustfmt::skip]
        let F = DMatrix::<f64>::from_row_slice(5, 5, &[
            1., 0., ts * sincth, -ts * coscth, ts.powi(2) * (u0 * dsincth - v0 * dcoscth),
            0., 1., ts * coscth,  ts * sincth, ts.powi(2) * (u0 * dcoscth + v0 * dsincth),
            0., 0., cth,         -sth,         -ts * (u0 * sth + v0 * cth),
            0., 0., sth,          cth,          ts * (u0 * cth - v0 * sth),
            0., 0., 0.,           0.,           1.,
        ]);
        Ok(F)
    }

    fn Q(&self, x: &DVector<f64>, ts: f64) -> Result<DMatrix<f64>> {
        check_ts(ts)?;
        Self::check_state(x)?;
        let mut Q = DMatrix::zeros(5, 5);
        Q.view_mut((0, 0), (2, 2))
            .copy_from(&DMatrix::from_diagonal_element(2, 2, ts.powi(3) / 3.0));
        Q.view_mut((2, 2), (2, 2))
            .copy_from(&DMatrix::from_diagonal_element(2, 2, ts));
        Q.view_mut((0, 2), (2, 2))
            .copy_from(&DMatrix::from_diagonal_element(2, 2, ts.powi(2) / 2.0));
        Q.view_mut((2, 0), (2, 2))
            .copy_from(&DMatrix::from_diagonal_element(2, 2, ts.powi(2) / 2.0));
        Q *= self.sigma_a.powi(2);
        Q[(4, 4)] = ts * self.sigma_w.powi(2);
        Ok(Q)
    }
}
