//! SQL query implementations for the PostgreSQL storage backend.
//!
//! Every function takes a generic executor so the same SQL serves both the
//! pool and an open transaction.

pub mod crud;
pub mod sequence;
