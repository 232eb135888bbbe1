//! Switchyard operator: wiring for the controller, runtime and webhook modes

#![deny(missing_docs)]

pub mod config;
/// Controller construction per process mode
pub mod controller_runner;
/// CRD installation and rendering
pub mod crds;
