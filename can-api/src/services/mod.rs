//! Service modules for can.
//!
//! - API handlers validate requests and translate them into provider calls
//! - The pod service runs creation pipelines with streamed progress
//! - The reporter logs runtime state in the background

pub mod container;
pub mod pod;
pub mod reporter;
