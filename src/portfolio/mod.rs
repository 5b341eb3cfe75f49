//! Portfolio Planner: candidate selection, bucket-equal weighting, the
//! plan package, a quality grader, and a view renderer.

pub mod planner;
pub mod quality;
pub mod view;
