//! Compose Guard
//!
//! A guarded landing-page composition service:
//! - Intent ladder (playbook, cache, rules, local model, budgeted escalation)
//! - Contracts verification and hardening before any commit
//! - Risk scoring, route policy gate and signed proof cards
//! - Quotas, drain/exec-tier context and a failure playbook
//! - A/B experiments with z-test / SPRT auto-stop

pub mod config;
pub mod contracts;
pub mod error;
pub mod experiments;
pub mod intent;
pub mod orchestrator;
pub mod safety;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use config::ComposeConfig;
pub use error::{ComposeError, FailureKind};
pub use orchestrator::Composer;
pub use server::{router, AppState};
