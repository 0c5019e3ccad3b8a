//! pgendpoint manager - binary support code
//!
//! Configuration loading, logging initialisation and adapter wiring for the
//! `pgendpoint-manager` executable. The engine itself lives in
//! `pgendpoint-core`.

pub mod model;
pub mod startup;
