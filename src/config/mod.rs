//! Configuration module for extraction runs
//!
//! This module provides the `ExtractConfig` struct and its builder for
//! configuring runs with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod methods;
pub mod types;

// Re-exports for public API
pub use builder::ExtractConfigBuilder;
pub use types::ExtractConfig;
