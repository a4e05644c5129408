use crate::error::{check_shape, Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// Mean `x` and covariance `P` of a multivariate normal belief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussParams {
    pub x: DVector<f64>,
    pub P: DMatrix<f64>,
}

impl GaussParams {
    pub fn new(x: DVector<f64>, P: DMatrix<f64>) -> Self {
        GaussParams { x, P }
    }

    pub fn zeros(n: usize) -> Self {
        GaussParams {
            x: DVector::zeros(n),
            P: DMatrix::zeros(n, n),
        }
    }

    pub fn dim(&self) -> usize {
        self.x.len()
    }

    /// Checks that `P` is square with the same dimension as `x`.
    pub fn check_dims(&self) -> Result<()> {
        let n = self.x.len();
        check_shape("state covariance", (n, n), self.P.shape())
    }

    pub fn destructure(self) -> (DVector<f64>, DMatrix<f64>) {
        (self.x, self.P)
    }
}

impl fmt::Display for GaussParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x: {}P: {}", self.x, self.P)
    }
}

/// Fixed-length trajectory of Gaussian states, allocated once and filled by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussParamList {
    n: usize,
    states: Vec<GaussParams>,
}

impl GaussParamList {
    /// Allocates `K` zero states of dimension `n`.
    pub fn allocate(K: usize, n: usize) -> Self {
        GaussParamList {
            n,
            states: vec![GaussParams::zeros(n); K],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// State dimension of every slot.
    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, k: usize) -> Option<&GaussParams> {
        self.states.get(k)
    }

    pub fn set(&mut self, k: usize, state: GaussParams) -> Result<()> {
        let len = self.states.len();
        if k >= len {
            return Err(Error::IndexOutOfBounds { index: k, len });
        }
        if state.dim() != self.n {
            return Err(Error::vector_len("trajectory slot", self.n, state.dim()));
        }
        state.check_dims()?;
        self.states[k] = state;
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GaussParams> {
        self.states.iter()
    }

    pub fn as_slice(&self) -> &[GaussParams] {
        &self.states
    }

    /// Means stacked column-wise, n×K.
    pub fn means(&self) -> DMatrix<f64> {
        let mut X = DMatrix::zeros(self.n, self.states.len());
        for (mut col, state) in X.column_iter_mut().zip(self.states.iter()) {
            col.copy_from(&state.x);
        }
        X
    }
}

impl Index<usize> for GaussParamList {
    type Output = GaussParams;

    fn index(&self, k: usize) -> &GaussParams {
        &self.states[k]
    }
}

impl<'a> IntoIterator for &'a GaussParamList {
    type Item = &'a GaussParams;
    type IntoIter = std::slice::Iter<'a, GaussParams>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}
