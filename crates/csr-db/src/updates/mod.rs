//! Update builder types for entity mutations.
//!
//! Each builder produces an update struct with `Option` fields. Only `Some` fields
//! generate SET clauses in the dynamic UPDATE SQL. The builder output is serialized
//! into the audit row's `after_state` (changed fields only).

pub mod outcomes;
pub mod user;
