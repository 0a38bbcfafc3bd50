//! Business logic services for the import and generation pipeline.

pub mod control_map;
pub mod dispositions;
pub mod generator;
pub mod identity;
pub mod jobs;
pub mod normalizer;
pub mod plans;
pub mod provisioning;
pub mod reconciliation;
pub mod worker;
