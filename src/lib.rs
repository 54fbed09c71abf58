//! Library crate for ot-discovery-rs: submit remote scan jobs, poll them to
//! completion and turn their results into a device inventory.
pub mod client;
pub mod config;
pub mod error;
pub mod inventory;
pub mod logging;
pub mod netrange;
pub mod normalize;
pub mod scheduler;
pub mod submitter;
pub mod summary;
pub mod types;
