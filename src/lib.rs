//! Circuit simulation as a service.
//!
//! A netlist is parsed and compiled up front; the analysis then runs on a
//! background thread and streams its samples into per-category channels that
//! callers drain incrementally, either in-process through
//! [`stream::ResultCursor`] or over HTTP through [`rpc`].

pub mod analysis;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod ir;
pub mod linalg;
pub mod output;
pub mod parser;
pub mod rpc;
pub mod stream;
