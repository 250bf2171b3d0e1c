//! # courier-core
//!
//! Core types for the courier protocol.
//!
//! This crate provides:
//! - Request / response envelope types
//! - The JSON envelope codec and wire constants
//! - Connection configuration
//! - The shared error type

pub mod codec;
pub mod config;
pub mod error;
pub mod message;

pub use codec::{INVALID_MESSAGE_PREFIX, SENTINEL, decode, encode, encode_frame};
pub use config::{ClientConfig, MessengerConfig, ServerConfig};
pub use error::{CourierError, Result};
pub use message::{ErrorPayload, Message, MessageId, Parameters, Request, Response};
