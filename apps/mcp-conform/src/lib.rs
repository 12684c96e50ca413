pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod report;
pub mod scenario;
pub mod session;
pub mod supervisor;
pub mod telemetry;
pub mod variant;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use report::Narrator;
pub use scenario::{ScenarioReport, run_target};
pub use variant::{Variant, classify};
