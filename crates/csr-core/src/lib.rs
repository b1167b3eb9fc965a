//! # csr-core
//!
//! Core types for the CSR / impact-reporting platform.
//!
//! This crate provides the foundational types shared across all CSR crates:
//! - Entity structs mirroring every table in the relational schema
//! - Status enums with state machine transitions
//! - ID prefix constants
//! - Typed shapes of JSON-valued columns
//! - Input validators for API payloads (age ranges, group sizes, PII in free text)
//! - Evidence-ledger digest and hash-chain verification
//! - Cross-cutting error types

pub mod entities;
pub mod enums;
pub mod errors;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod shapes;
pub mod validation;
