pub mod backup;
pub mod cli;
pub mod config;
pub mod context;
pub mod drift;
pub mod error;
pub mod health;
pub mod ledger;
pub mod notify;
pub mod remote;
pub mod report;
pub mod restore;
pub mod retention;
pub mod runtime;
pub mod signal_handler;
pub mod snapshot;
pub mod types;
pub mod util;

#[cfg(test)]
mod testing;
