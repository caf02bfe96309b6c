pub mod expected;
pub mod generator;
pub mod match_criteria;
pub mod poll;
pub mod verifier;

pub use expected::*;
pub use generator::{overlap_attribute, populate, value_for, SET_TOKENS};
pub use match_criteria::*;
pub use poll::*;
pub use verifier::*;
