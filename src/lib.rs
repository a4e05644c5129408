#![allow(non_snake_case)]
pub mod consistency;
pub mod error;
pub mod mixture;
pub mod performance;
pub mod state_estimator;

pub use error::{Error, Result};
