#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Nested logistic-regression study of reorganization ("emerge") outcomes in
//! corporate bankruptcy filings.

pub mod config;
pub mod extract;
pub mod features;
pub mod frame;
pub mod glm;
pub mod impute;
pub mod lrtest;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod superset;
