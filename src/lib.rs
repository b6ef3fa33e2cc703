pub mod config;
pub mod disagg;
pub mod error;
pub mod geo;
pub mod gmm;
pub mod hazard_curve;
pub mod logic_tree;
pub mod runtime;
pub mod source;

pub use error::{DisaggError, Result};
