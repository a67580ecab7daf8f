//! Core domain types for the Hydra evaluation scheduler.
//!
//! This crate contains:
//! - Jobset identity and registry records
//! - Evaluation styles and their database encoding
//! - The database-free part of the scheduling decision

pub mod jobset;
pub mod schedule;

pub use jobset::{EvaluationStyle, Jobset, JobsetName};
pub use schedule::{dispatch_order, eligibility, next_wakeup, Eligibility};
