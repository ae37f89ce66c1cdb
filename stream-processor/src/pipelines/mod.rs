//! Pipeline topologies.
//!
//! Each topology is a fixed sequence of stage functions from [`crate::stages`]
//! that maps one record to a routing outcome and the emissions it implies.
//!
//! ## Available topologies
//!
//! - `filter_reject`: clean and validate free text, dead-letter the rejects
//! - `aggregate`: parse weather readings and keep per-station running averages

pub mod aggregate;
pub mod filter_reject;
pub mod traits;

pub use aggregate::{AggregateSettings, AggregateTopology};
pub use filter_reject::FilterRejectTopology;
pub use traits::{Emission, Outcome, Processed, Topology};
