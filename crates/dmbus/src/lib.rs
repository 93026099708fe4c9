//! The communication interface between a gateway client and a
//! topic-addressed device-management bus.
//!
//! This crate provides APIs to:
//!
//! - Build the topics used to address control requests to device endpoints
//!   and recognize the topics on which notifications are pushed back.
//! - Encode the bodies of control requests, such as endpoint discovery,
//!   resource reads, and resource subscriptions.
//! - Decode notification envelopes into an ordered sequence of result
//!   records.
//! - Decrypt the encrypted payload carried by each result record and
//!   interpret the recovered plaintext as a typed value.
//!
//! Encrypting payloads is only needed by producers and tests. A consumer can
//! avoid importing encryption functions by disabling the `encrypt` feature at
//! compile time.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Symmetric decryption of notification payloads.
pub mod cipher;
/// Notification envelopes and their result records.
pub mod envelope;
/// Error management.
pub mod error;
/// Control requests and their bodies.
pub mod request;
/// Topic addressing.
pub mod topic;
/// Typed values recovered from decrypted payloads.
pub mod value;

pub use error::{Error, ErrorKind, Result};
