//! Binary asset formats

pub mod dcc;
