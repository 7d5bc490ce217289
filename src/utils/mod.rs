//! Shared utility functions for quizforge.
//!
//! This module provides common utilities used across multiple modules,
//! including JSON extraction from LLM responses.

pub mod json_extraction;

pub use json_extraction::{
    analyze_json_structure, extract_json_object, find_matching_brace, parse_json_object,
    strip_code_fence, JsonExtractionError, JsonExtractionResult, JsonStructureAnalysis,
};
