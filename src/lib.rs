//! Differential API-mapping harness for Swagger-generated clients.
//!
//! The library exposes the core `swagger` subsystem (expansion,
//! monomorphization, synthesis, correlation) plus the mock server and run
//! driver the binary wires together.

pub mod config;
pub mod ctrl;
pub mod logging;
pub mod mockserver;
pub mod swagger;
