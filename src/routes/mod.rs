//! Route definitions for the Fismatic API.

pub mod findings;
pub mod health;
pub mod imports;
pub mod remediation;
pub mod systems;
