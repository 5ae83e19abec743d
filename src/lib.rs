pub mod alignment;
pub mod checksum;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod reconcile;
pub mod reference;
pub mod xml;
