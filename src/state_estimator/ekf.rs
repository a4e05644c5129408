use super::gaussparams::GaussParams;
use super::models::{DynamicModel, MeasurementModel};
use super::StateEstimator;
use crate::consistency::Consistency;
use crate::error::{check_shape, Error, Result};
use crate::mixture::{mixture_moments, ReduceMixture};
use log::{trace, warn};
use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, Dyn};
use std::f64::consts::TAU as _2_PI;

/// Default slack of the eigenvalue test on updated covariances, relative to
/// the largest eigenvalue magnitude.
pub const DEFAULT_PSD_TOLERANCE: f64 = 1e-9;

/// Measurement residual `v = z - h(x)` and its covariance `S`.
#[derive(Debug, Clone, PartialEq)]
pub struct Innovation {
    pub v: DVector<f64>,
    pub S: DMatrix<f64>,
}

impl From<Innovation> for GaussParams {
    fn from(innovation: Innovation) -> Self {
        GaussParams::new(innovation.v, innovation.S)
    }
}

// Cholesky factor of a covariance that has to be positive definite.
fn cholesky_pd(M: DMatrix<f64>, what: &'static str) -> Result<Cholesky<f64, Dyn>> {
    if M.iter().any(|m| !m.is_finite()) {
        return Err(Error::SingularCovariance(what));
    }
    let chol = M.cholesky().ok_or(Error::SingularCovariance(what))?;
    // nalgebra accepts zero pivots
    if chol.l_dirty().diagonal().iter().all(|&d| d > 0.0 && d.is_finite()) {
        Ok(chol)
    } else {
        Err(Error::SingularCovariance(what))
    }
}

// Innovation with the linearization it was computed from
struct FactoredInnovation {
    v: DVector<f64>,
    H: DMatrix<f64>,
    R: DMatrix<f64>,
    S_chol: Cholesky<f64, Dyn>,
}

fn log_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

/// Extended Kalman filter over a dynamic model and a measurement model.
#[derive(Debug, Clone)]
pub struct EKF<D, M> {
    dynmod: D,
    measmod: M,
    mlog2pi_by_2: f64,
    psd_tolerance: f64,
}

impl<D, M> EKF<D, M>
where
    D: DynamicModel,
    M: MeasurementModel,
{
    pub fn init(dynmod: D, measmod: M) -> Self {
        let mlog2pi_by_2 = measmod.m() as f64 * _2_PI.ln() / 2.0;
        EKF {
            dynmod,
            measmod,
            mlog2pi_by_2,
            psd_tolerance: DEFAULT_PSD_TOLERANCE,
        }
    }

    pub fn with_psd_tolerance(self, psd_tolerance: f64) -> Self {
        EKF {
            psd_tolerance,
            ..self
        }
    }

    pub fn dynamic_model(&self) -> &D {
        &self.dynmod
    }

    pub fn sensor_model(&self) -> &M {
        &self.measmod
    }

    pub fn innovation_mean(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<DVector<f64>> {
        self.check_measurement(z)?;
        let zbar = self.measmod.h(&eststate.x, sensor_state)?;
        check_shape("predicted measurement", (self.measmod.m(), 1), zbar.shape())?;
        Ok(self.measmod.residual(z, &zbar))
    }

    pub fn innovation_cov(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<DMatrix<f64>> {
        let (H, R) = self.linearize(z, eststate, sensor_state)?;
        Ok(&H * &eststate.P * H.transpose() + R)
    }

    pub fn innovation(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<Innovation> {
        let v = self.innovation_mean(z, eststate, sensor_state)?;
        let S = self.innovation_cov(z, eststate, sensor_state)?;
        Ok(Innovation { v, S })
    }

    // Measurement Jacobian and noise at the state estimate
    fn linearize(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
        eststate.check_dims()?;
        self.check_measurement(z)?;
        let x = &eststate.x;
        let H = self.measurement_jacobian(x, sensor_state)?;
        let R = self.measurement_noise(x, sensor_state, z)?;
        Ok((H, R))
    }

    fn check_measurement(&self, z: &DVector<f64>) -> Result<()> {
        check_shape("measurement", (self.measmod.m(), 1), z.shape())
    }

    fn measurement_jacobian(
        &self,
        x: &DVector<f64>,
        sensor_state: Option<&M::Context>,
    ) -> Result<DMatrix<f64>> {
        let H = self.measmod.H(x, sensor_state)?;
        check_shape("measurement Jacobian", (self.measmod.m(), x.len()), H.shape())?;
        Ok(H)
    }

    fn measurement_noise(
        &self,
        x: &DVector<f64>,
        sensor_state: Option<&M::Context>,
        z: &DVector<f64>,
    ) -> Result<DMatrix<f64>> {
        let m = self.measmod.m();
        let R = self.measmod.R(x, sensor_state, Some(z))?;
        check_shape("measurement noise", (m, m), R.shape())?;
        Ok(R)
    }

    fn factored_innovation(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<FactoredInnovation> {
        let v = self.innovation_mean(z, eststate, sensor_state)?;
        let (H, R) = self.linearize(z, eststate, sensor_state)?;
        let S = &H * &eststate.P * H.transpose() + &R;
        let S_chol = cholesky_pd(S, "innovation covariance")?;
        Ok(FactoredInnovation { v, H, R, S_chol })
    }

    fn check_psd(&self, P: &DMatrix<f64>, what: &'static str) -> Result<()> {
        let min_eigenvalue = if P.iter().all(|p| p.is_finite()) {
            let eigenvalues = P.clone().symmetric_eigenvalues();
            let scale = eigenvalues.amax().max(1.0);
            let min = eigenvalues.min();
            if min >= -self.psd_tolerance * scale {
                return Ok(());
            }
            min
        } else {
            f64::NAN
        };
        warn!("rejecting {} with min eigenvalue {}", what, min_eigenvalue);
        Err(Error::IndefiniteCovariance {
            what,
            min_eigenvalue,
        })
    }
}

impl<D, M> StateEstimator for EKF<D, M>
where
    D: DynamicModel,
    M: MeasurementModel,
{
    type Params = GaussParams;
    type Measurement = DVector<f64>;
    type Context = M::Context;

    fn predict(&self, eststate: &GaussParams, ts: f64) -> Result<GaussParams> {
        eststate.check_dims()?;
        let x = &eststate.x;
        let P = &eststate.P;
        let n = x.len();

        let F = self.dynmod.F(x, ts)?;
        check_shape("transition Jacobian", (n, n), F.shape())?;
        let Q = self.dynmod.Q(x, ts)?;
        check_shape("process noise", (n, n), Q.shape())?;

        let x_pred = self.dynmod.f(x, ts)?;
        check_shape("predicted state", (n, 1), x_pred.shape())?;
        let P_pred = &F * P * F.transpose() + Q;

        trace!("predicted {} ahead to x = {}", ts, x_pred.transpose());
        Ok(GaussParams::new(x_pred, P_pred))
    }

    fn update(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<GaussParams> {
        let FactoredInnovation { v, H, R, S_chol } =
            self.factored_innovation(z, eststate, sensor_state)?;

        let x = &eststate.x;
        let P = &eststate.P;
        let n = x.len();

        // Kalman gain W = P H' S^-1
        let W = S_chol.solve(&(&H * P)).transpose();

        // Joseph form of (I - WH)P
        let Jo = DMatrix::identity(n, n) - &W * &H;
        let P_upd = &Jo * P * Jo.transpose() + &W * R * W.transpose();
        let P_upd = (&P_upd + P_upd.transpose()) * 0.5;
        self.check_psd(&P_upd, "updated state covariance")?;

        let x_upd = x + &W * v;

        trace!("updated to x = {}", x_upd.transpose());
        Ok(GaussParams::new(x_upd, P_upd))
    }

    fn estimate(&self, eststate: GaussParams) -> Result<GaussParams> {
        Ok(eststate)
    }

    fn loglikelihood(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<f64> {
        let FactoredInnovation { v, S_chol, .. } =
            self.factored_innovation(z, eststate, sensor_state)?;
        let nis = v.dot(&S_chol.solve(&v));
        Ok(-0.5 * (nis + log_det(&S_chol)) - self.mlog2pi_by_2)
    }

    fn gate(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        gate_size_square: f64,
        sensor_state: Option<&M::Context>,
    ) -> Result<bool> {
        let nis = self.NIS(z, eststate, sensor_state)?;
        Ok(nis <= gate_size_square)
    }
}

impl<D, M> Consistency for EKF<D, M>
where
    D: DynamicModel,
    M: MeasurementModel,
{
    type Params = GaussParams;
    type Measurement = DVector<f64>;
    type Context = M::Context;
    type GroundTruth = DVector<f64>;

    fn NIS(
        &self,
        z: &DVector<f64>,
        eststate: &GaussParams,
        sensor_state: Option<&M::Context>,
    ) -> Result<f64> {
        let FactoredInnovation { v, S_chol, .. } =
            self.factored_innovation(z, eststate, sensor_state)?;
        Ok(v.dot(&S_chol.solve(&v)))
    }

    fn NEES(&self, eststate: &GaussParams, x_gt: &DVector<f64>) -> Result<f64> {
        eststate.check_dims()?;
        check_shape("ground truth", eststate.x.shape(), x_gt.shape())?;
        let x_err = &eststate.x - x_gt;
        let P_chol = cholesky_pd(eststate.P.clone(), "state covariance")?;
        Ok(x_err.dot(&P_chol.solve(&x_err)))
    }
}

impl<D, M> ReduceMixture<GaussParams> for EKF<D, M> {
    fn reduce_mixture(&self, weights: &[f64], components: &[GaussParams]) -> Result<GaussParams> {
        let (x, P) = mixture_moments(
            weights,
            components.iter().map(|c| (&c.x, &c.P)).collect(),
        )?;
        Ok(GaussParams::new(x, P))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_estimator::models::dynamic::{CT, CV};
    use crate::state_estimator::models::measurement::{
        CartesianPosition, RangeBearing, SensorPosition,
    };
    use approx::assert_relative_eq;
    use std::cell::Cell;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn cv_1d(sigma_a: f64, sigma_z: f64) -> EKF<CV, CartesianPosition> {
        EKF::init(CV::new(sigma_a), CartesianPosition::with_dim(1, sigma_z))
    }

    fn unit_state() -> GaussParams {
        GaussParams::new(DVector::from_row_slice(&[0., 1.]), DMatrix::identity(2, 2))
    }

    fn assert_symmetric_psd(P: &DMatrix<f64>) {
        let scale = P.amax().max(1.0);
        assert!((P - P.transpose()).amax() <= 1e-12 * scale, "P not symmetric: {}", P);
        let min = P.clone().symmetric_eigenvalues().min();
        assert!(min >= -1e-9 * scale, "P not PSD: {}", P);
    }

    #[test]
    fn test_predict_cv_1d() {
        let ekf = cv_1d(0.0, 1.0);
        let state_pred = ekf.predict(&unit_state(), 1.0).unwrap();
        assert_eq!(state_pred.x, DVector::from_row_slice(&[1., 1.]));
        let P_correct = DMatrix::from_row_slice(2, 2, &[2., 1., 1., 1.]);
        assert!(P_correct.relative_eq(&state_pred.P, 1e-12, 1e-12));
    }

    #[test]
    fn test_predict_adds_process_noise() {
        let ekf = cv_1d(0.5, 1.0);
        let state_pred = ekf.predict(&unit_state(), 2.0).unwrap();
        #[rustfmt::skip]
        let P_correct = DMatrix::from_row_slice(2, 2, &[
            5. + 0.25 * 8. / 3., 2. + 0.25 * 2.,
            2. + 0.25 * 2.,      1. + 0.25 * 2.,
        ]);
        assert!(P_correct.relative_eq(&state_pred.P, 1e-12, 1e-12));
    }

    #[test]
    fn test_update_with_zero_innovation() {
        let ekf = cv_1d(0.0, 1.0);
        let state_pred = ekf.predict(&unit_state(), 1.0).unwrap();
        let z = DVector::from_row_slice(&[1.0]);
        let state_upd = ekf.update(&z, &state_pred, None).unwrap();

        assert!(state_upd.x.relative_eq(&state_pred.x, 1e-12, 1e-12));
        #[rustfmt::skip]
        let P_correct = DMatrix::from_row_slice(2, 2, &[
            2. / 3., 1. / 3.,
            1. / 3., 2. / 3.,
        ]);
        assert!(P_correct.relative_eq(&state_upd.P, 1e-12, 1e-12));
        assert!(state_upd.P[(0, 0)] < state_pred.P[(0, 0)]);
    }

    #[test]
    fn test_update_pulls_toward_measurement() {
        init_logging();
        let ekf = cv_1d(0.0, 1.0);
        let state_pred = ekf.predict(&unit_state(), 1.0).unwrap();
        let z = DVector::from_row_slice(&[2.0]);
        let state_upd = ekf.update(&z, &state_pred, None).unwrap();

        // W = [2/3, 1/3], v = 1
        let x_correct = DVector::from_row_slice(&[5. / 3., 4. / 3.]);
        assert!(x_correct.relative_eq(&state_upd.x, 1e-12, 1e-12));
        assert!(state_upd.x[0] > state_pred.x[0] && state_upd.x[0] < z[0]);
        assert_symmetric_psd(&state_upd.P);
    }

    #[test]
    fn test_innovation() {
        let ekf = cv_1d(0.0, 1.0);
        let state_pred = ekf.predict(&unit_state(), 1.0).unwrap();
        let z = DVector::from_row_slice(&[2.5]);
        let Innovation { v, S } = ekf.innovation(&z, &state_pred, None).unwrap();
        assert_relative_eq!(v[0], 1.5);
        assert_relative_eq!(S[(0, 0)], 3.0);

        let as_gauss: GaussParams = Innovation { v, S }.into();
        assert_eq!(as_gauss.dim(), 1);
    }

    #[test]
    fn test_step_equals_predict_then_update() {
        let ekf = EKF::init(CV::new(0.3), CartesianPosition::new(2.0));
        let state = GaussParams::new(
            DVector::from_row_slice(&[1., 2., 0.5, -0.5]),
            DMatrix::from_diagonal_element(4, 4, 3.0),
        );
        let z = DVector::from_row_slice(&[2.1, 1.2]);

        let stepped = ekf.step(&z, &state, 1.5, None).unwrap();
        let manual = ekf
            .update(&z, &ekf.predict(&state, 1.5).unwrap(), None)
            .unwrap();
        assert_eq!(stepped, manual);
    }

    #[test]
    fn test_nis_and_loglikelihood_closed_form() {
        let ekf = cv_1d(0.0, 1.0);
        let state_pred = ekf.predict(&unit_state(), 1.0).unwrap();
        let z = DVector::from_row_slice(&[2.0]);

        let nis = ekf.NIS(&z, &state_pred, None).unwrap();
        assert_relative_eq!(nis, 1. / 3., epsilon = 1e-12);

        let ll = ekf.loglikelihood(&z, &state_pred, None).unwrap();
        let ll_correct = -0.5 * (1. / 3. + _2_PI.ln() + (3.0f64).ln());
        assert_relative_eq!(ll, ll_correct, epsilon = 1e-12);
    }

    #[test]
    fn test_loglikelihood_matches_gaussian_density() {
        let ekf = EKF::init(CV::new(0.3), CartesianPosition::new(2.0));
        let state = GaussParams::new(
            DVector::from_row_slice(&[1., 2., 0.5, -0.5]),
            DMatrix::from_row_slice(4, 4, &[
                3., 0.5, 0., 0., 0.5, 2., 0., 0., 0., 0., 1., 0., 0., 0., 0., 1.,
            ]),
        );
        let z = DVector::from_row_slice(&[2.1, 1.2]);
        let Innovation { v, S } = ekf.innovation(&z, &state, None).unwrap();

        let S_inv = S.clone().try_inverse().unwrap();
        let density = (-0.5 * v.dot(&(&S_inv * &v))).exp()
            / ((_2_PI).powi(2) * S.determinant()).sqrt();
        let ll = ekf.loglikelihood(&z, &state, None).unwrap();
        assert_relative_eq!(ll, density.ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_nis_is_nonnegative_and_gate_monotone() {
        let ekf = EKF::init(CV::new(0.3), CartesianPosition::new(2.0));
        let state = GaussParams::new(
            DVector::from_row_slice(&[1., 2., 0.5, -0.5]),
            DMatrix::from_diagonal_element(4, 4, 3.0),
        );
        for &(a, b) in &[(0., 0.), (1., 2.), (-5., 8.), (30., -12.)] {
            let z = DVector::from_row_slice(&[a, b]);
            let nis = ekf.NIS(&z, &state, None).unwrap();
            assert!(nis >= 0.0);

            let thresholds = [0.5, 1., 4., 9., 25., 100., 1000.];
            let mut gated = false;
            for &g in thresholds.iter() {
                let inside = ekf.gate(&z, &state, g, None).unwrap();
                assert!(inside || !gated, "gate not monotone at {}", g);
                assert_eq!(inside, nis <= g);
                gated = inside;
            }
        }
    }

    #[test]
    fn test_singular_innovation_covariance() {
        let ekf = cv_1d(0.0, 0.0);
        let state = GaussParams::new(DVector::from_row_slice(&[0., 1.]), DMatrix::zeros(2, 2));
        let z = DVector::from_row_slice(&[1.0]);

        assert!(matches!(
            ekf.update(&z, &state, None),
            Err(Error::SingularCovariance(_))
        ));
        assert!(matches!(ekf.NIS(&z, &state, None), Err(Error::SingularCovariance(_))));
        assert!(matches!(
            ekf.loglikelihood(&z, &state, None),
            Err(Error::SingularCovariance(_))
        ));
    }

    #[test]
    fn test_measurement_dimension_mismatch() {
        let ekf = cv_1d(0.1, 1.0);
        let z = DVector::from_row_slice(&[1.0, 2.0]);
        assert!(matches!(
            ekf.update(&z, &unit_state(), None),
            Err(Error::DimensionMismatch { what: "measurement", .. })
        ));
    }

    #[test]
    fn test_state_dimension_mismatch() {
        let ekf = cv_1d(0.1, 1.0);
        let state = GaussParams::new(DVector::from_row_slice(&[0., 1.]), DMatrix::identity(3, 3));
        assert!(matches!(
            ekf.predict(&state, 1.0),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_indefinite_covariance_after_update() {
        let ekf = cv_1d(0.0, 1.0);
        let state = GaussParams::new(
            DVector::from_row_slice(&[0., 1.]),
            DMatrix::from_diagonal(&DVector::from_row_slice(&[1., -1.])),
        );
        let z = DVector::from_row_slice(&[0.5]);
        match ekf.update(&z, &state, None) {
            Err(Error::IndefiniteCovariance { min_eigenvalue, .. }) => {
                assert_relative_eq!(min_eigenvalue, -1.0, epsilon = 1e-12)
            }
            other => panic!("expected IndefiniteCovariance, got {:?}", other),
        }
    }

    #[test]
    fn test_model_errors_propagate() {
        let ekf = cv_1d(0.1, 1.0);
        assert!(matches!(
            ekf.predict(&unit_state(), -1.0),
            Err(Error::InvalidTimeStep(ts)) if ts == -1.0
        ));
    }

    #[test]
    fn test_estimate_is_identity() {
        let ekf = cv_1d(0.1, 1.0);
        assert_eq!(ekf.estimate(unit_state()).unwrap(), unit_state());
    }

    #[test]
    fn test_nees() {
        let ekf = cv_1d(0.1, 1.0);
        let state = GaussParams::new(
            DVector::from_row_slice(&[1., 1.]),
            DMatrix::from_diagonal(&DVector::from_row_slice(&[4., 0.25])),
        );
        let x_gt = DVector::from_row_slice(&[3., 0.5]);
        // 2^2 / 4 + 0.5^2 / 0.25
        assert_relative_eq!(ekf.NEES(&state, &x_gt).unwrap(), 2.0, epsilon = 1e-12);

        let singular = GaussParams::new(state.x.clone(), DMatrix::zeros(2, 2));
        assert!(matches!(
            ekf.NEES(&singular, &x_gt),
            Err(Error::SingularCovariance(_))
        ));
    }

    #[test]
    fn test_reduce_mixture() {
        let ekf = cv_1d(0.1, 1.0);
        let components = vec![
            GaussParams::new(DVector::from_row_slice(&[0., 0.]), DMatrix::identity(2, 2)),
            GaussParams::new(DVector::from_row_slice(&[2., 0.]), DMatrix::identity(2, 2)),
        ];
        let reduced = ekf.reduce_mixture(&[0.5, 0.5], &components).unwrap();
        assert!(reduced.x.relative_eq(&DVector::from_row_slice(&[1., 0.]), 1e-12, 1e-12));
        let P_correct = DMatrix::from_diagonal(&DVector::from_row_slice(&[2., 1.]));
        assert!(P_correct.relative_eq(&reduced.P, 1e-12, 1e-12));
    }

    #[test]
    fn test_range_bearing_context_is_passed_to_sensor() {
        let ekf = EKF::init(CV::new(0.1), RangeBearing::new(0.5, 0.01));
        let state = GaussParams::new(
            DVector::from_row_slice(&[10., 0., 0., 0.]),
            DMatrix::identity(4, 4),
        );
        let sensor = SensorPosition::new(0., -10.);
        let z = DVector::from_row_slice(&[200f64.sqrt(), std::f64::consts::FRAC_PI_4]);

        let v = ekf.innovation_mean(&z, &state, Some(&sensor)).unwrap();
        assert!(v.amax() < 1e-12);
        let v_origin = ekf.innovation_mean(&z, &state, None).unwrap();
        assert!(v_origin.amax() > 1.0);
    }

    #[test]
    fn test_updates_stay_symmetric_psd() {
        init_logging();
        let ct = CT::new(0.5, 0.01);
        let ekf = EKF::init(ct.clone(), RangeBearing::new(1.0, 0.005));
        let sensors = [SensorPosition::new(0., 0.), SensorPosition::new(0., 200.)];

        let mut x_true = DVector::from_row_slice(&[100., 50., 5., -2., 0.05]);
        let mut state = GaussParams::new(
            DVector::from_row_slice(&[95., 55., 4., -1., 0.]),
            DMatrix::from_diagonal(&DVector::from_row_slice(&[25., 25., 4., 4., 0.01])),
        );
        for k in 0..20 {
            let sensor = &sensors[k % 2];
            x_true = ct.f(&x_true, 1.0).unwrap();
            let z = ekf.sensor_model().h(&x_true, Some(sensor)).unwrap();

            let state_pred = ekf.predict(&state, 1.0).unwrap();
            assert_symmetric_psd(&state_pred.P);
            state = ekf.update(&z, &state_pred, Some(sensor)).unwrap();
            assert_symmetric_psd(&state.P);
        }
        assert!((&state.x.rows(0, 2) - &x_true.rows(0, 2)).norm() < 5.0);
    }

    #[test]
    fn test_bearing_innovation_across_branch_cut() {
        let ekf = EKF::init(CV::new(0.1), RangeBearing::new(0.5, 0.01));
        let state = GaussParams::new(
            DVector::from_row_slice(&[-10., 0.01, 0., 0.]),
            DMatrix::identity(4, 4),
        );
        let range = state.x[0].hypot(state.x[1]);
        let z = DVector::from_row_slice(&[range, -std::f64::consts::PI + 0.001]);

        let v = ekf.innovation_mean(&z, &state, None).unwrap();
        assert!(v.amax() < 0.01, "unwrapped bearing residual: {}", v);
        assert!(ekf.NIS(&z, &state, None).unwrap() < 1.0);
        assert!(ekf.gate(&z, &state, 9.0, None).unwrap());

        let state_upd = ekf.update(&z, &state, None).unwrap();
        assert!((&state_upd.x - &state.x).amax() < 0.1);
    }

    struct CountingSensor {
        inner: CartesianPosition,
        h_calls: Cell<usize>,
        H_calls: Cell<usize>,
        R_calls: Cell<usize>,
    }

    impl MeasurementModel for CountingSensor {
        type Context = ();

        fn m(&self) -> usize {
            self.inner.m()
        }
        fn h(&self, x: &DVector<f64>, sensor_state: Option<&()>) -> Result<DVector<f64>> {
            self.h_calls.set(self.h_calls.get() + 1);
            self.inner.h(x, sensor_state)
        }
        fn H(&self, x: &DVector<f64>, sensor_state: Option<&()>) -> Result<DMatrix<f64>> {
            self.H_calls.set(self.H_calls.get() + 1);
            self.inner.H(x, sensor_state)
        }
        fn R(
            &self,
            x: &DVector<f64>,
            sensor_state: Option<&()>,
            z: Option<&DVector<f64>>,
        ) -> Result<DMatrix<f64>> {
            self.R_calls.set(self.R_calls.get() + 1);
            self.inner.R(x, sensor_state, z)
        }
    }

    #[test]
    fn test_update_evaluates_sensor_model_once() {
        let sensor = CountingSensor {
            inner: CartesianPosition::with_dim(1, 1.0),
            h_calls: Cell::new(0),
            H_calls: Cell::new(0),
            R_calls: Cell::new(0),
        };
        let ekf = EKF::init(CV::new(0.0), &sensor);
        let z = DVector::from_element(1, 2.0);
        let state_upd = ekf.update(&z, &unit_state(), None).unwrap();

        assert_eq!(sensor.h_calls.get(), 1);
        assert_eq!(sensor.H_calls.get(), 1);
        assert_eq!(sensor.R_calls.get(), 1);
        assert_eq!(state_upd, cv_1d(0.0, 1.0).update(&z, &unit_state(), None).unwrap());
    }
}
