//! Types shared between the chat relay and its clients.
//!
//! This crate provides:
//! - Signed, time-bounded bearer tokens ([`token`])
//! - The text wire format and protocol constants ([`wire`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod token;
pub mod wire;

pub use token::{Claims, InvalidReason, TokenKeys};
