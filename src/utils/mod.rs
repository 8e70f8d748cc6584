//! Shared utility functions for negot-sim.
//!
//! Currently only JSON extraction from model replies.

pub mod json_extraction;

pub use json_extraction::{extract_json_object, find_matching_brace, JsonExtractionError};
