//! # csr-schema
//!
//! JSON Schema generation, validation, and registry for the CSR platform.
//!
//! Entity and input types are defined in `csr-core` with `#[derive(JsonSchema)]`.
//! This crate collects their schemas into a [`SchemaRegistry`], validates
//! arbitrary JSON against them, and parses API payloads through both the
//! schema and the `csr_core::validation::Validate` refinements.

pub mod error;
pub mod registry;

pub use error::SchemaError;
pub use registry::SchemaRegistry;
