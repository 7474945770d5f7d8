// runbook-common: shared types and protocol for the Runbook workspace

pub mod protocol;
pub mod step;
pub mod types;
