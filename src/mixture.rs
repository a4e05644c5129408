use crate::error::{check_shape, Error, Result};
use nalgebra::{DMatrix, DVector};

/// Weighted set of filter states.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureParameters<T> {
    pub weights: Vec<f64>,
    pub components: Vec<T>,
}

impl<T> MixtureParameters<T> {
    pub fn new(weights: Vec<f64>, components: Vec<T>) -> Self {
        MixtureParameters {
            weights,
            components,
        }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> {
        self.weights.iter().copied().zip(self.components.iter())
    }

    pub fn destructure(self) -> (Vec<f64>, Vec<T>) {
        (self.weights, self.components)
    }
}

/// Collapse of a weighted mixture of states into a single state.
pub trait ReduceMixture<T> {
    fn reduce_mixture(&self, weights: &[f64], components: &[T]) -> Result<T>;

    fn reduce(&self, mixture: &MixtureParameters<T>) -> Result<T> {
        self.reduce_mixture(&mixture.weights, &mixture.components)
    }
}

/// First two moments of a Gaussian mixture.
///
/// `mean_bar = Σ wᵢ μᵢ` and
/// `cov_bar = Σ wᵢ Σᵢ + Σ wᵢ (μᵢ - mean_bar)(μᵢ - mean_bar)ᵀ`.
/// The weights are used as given; normalizing them is up to the caller.
pub fn gaussian_mixture_moments(
    w: &[f64],
    mean: &[DVector<f64>],
    cov: &[DMatrix<f64>],
) -> Result<(DVector<f64>, DMatrix<f64>)> {
    if mean.len() != w.len() {
        return Err(Error::vector_len("mixture means", w.len(), mean.len()));
    }
    if cov.len() != w.len() {
        return Err(Error::vector_len("mixture covariances", w.len(), cov.len()));
    }
    mixture_moments(w, mean.iter().zip(cov.iter()).collect())
}

pub(crate) fn mixture_moments(
    w: &[f64],
    components: Vec<(&DVector<f64>, &DMatrix<f64>)>,
) -> Result<(DVector<f64>, DMatrix<f64>)> {
    if components.len() != w.len() {
        return Err(Error::vector_len("mixture components", w.len(), components.len()));
    }
    let n = match components.first() {
        Some((mean, _)) => mean.len(),
        None => return Err(Error::EmptyMixture),
    };
    for (mean, cov) in components.iter() {
        check_shape("mixture mean", (n, 1), mean.shape())?;
        check_shape("mixture covariance", (n, n), cov.shape())?;
    }

    let mut mean_bar = DVector::zeros(n);
    for (&wi, (mean, _)) in w.iter().zip(components.iter()) {
        mean_bar.axpy(wi, *mean, 1.0);
    }

    // internal covariance plus spread of means
    let mut cov_bar = DMatrix::zeros(n, n);
    for (&wi, (mean, cov)) in w.iter().zip(components.iter()) {
        let diff = *mean - &mean_bar;
        cov_bar += *cov * wi;
        cov_bar.ger(wi, &diff, &diff, 1.0);
    }

    Ok((mean_bar, cov_bar))
}
