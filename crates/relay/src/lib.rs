// runbook-relay: real-time collaboration relay for workflow documents.

pub mod app;
pub mod auth;
pub mod autosave;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod presence;
pub mod store;
pub mod ws;
