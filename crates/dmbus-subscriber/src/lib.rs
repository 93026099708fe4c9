//! The `dmbus-subscriber` library crate provides the runtime side of a
//! gateway client for a topic-addressed device-management bus.
//!
//! Core functionalities of this crate include:
//!
//! - Subscribing to the notification namespace of a broker and decrypting
//!   the payloads pushed by devices, one message at a time and in arrival
//!   order
//! - Forwarding responses to control requests without decrypting them
//! - Publishing one-shot control requests, such as endpoint discovery,
//!   resource reads, and resource subscriptions
//!
//! The bus transport sits behind the [`transport::Transport`] trait, while
//! [`transport::MqttTransport`] implements it on top of `rumqttc`.
//!
//! `dmbus-subscriber` leverages `tokio` as an asynchronous executor. The
//! subscriber loop is a single task whose only suspension points are the wait
//! for the next transport event and the delivery of a decoded event, so
//! decryption never runs concurrently and events keep the order in which the
//! broker delivered them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Broker configuration.
pub mod config;
/// Error management.
pub mod error;
/// One-shot publication of control requests.
pub mod publisher;
/// The secure notification subscriber.
pub mod subscriber;
/// The bus transport contract and its `MQTT` implementation.
pub mod transport;
