pub mod commands;
pub mod config;
pub mod device;
/// Reference-driven comparison of a stored tree against live values.
pub mod diff;
pub mod error;
pub mod metrics;
pub mod mqtt;
pub mod reconcile;
/// YAML text form of a configuration tree.
pub mod serializer;
pub mod store;
pub mod tree;
pub mod watcher;
pub mod workflow;
