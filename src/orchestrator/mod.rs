//! Orchestrator Module
//!
//! Coordinates the intent ladder, contracts guard, policy gate and
//! experiments behind a single [`Composer`].

pub mod composer;

pub use composer::{
    Composer, Composition, ExperimentStatus, ProofLookup, Resolution, ROUTE_CHIP, ROUTE_MUTATE,
    ROUTE_PROMOTE, ROUTE_RESOLVE,
};
