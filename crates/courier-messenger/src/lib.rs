//! # courier-messenger
//!
//! Connection machinery shared by courier clients and servers.
//!
//! This crate provides:
//! - Sentinel-framed transports (TCP, Unix sockets, any byte stream)
//! - `Messenger`: one connection with its listen loop
//! - The awaiting-request registry and timeout sweep
//! - Receptor registration and request dispatch
//! - Request authentication

pub mod auth;
pub mod awaiting;
pub mod builtin;
pub mod connection;
pub mod dispatcher;
pub mod receptor;
pub mod tcp;
pub mod transport;
#[cfg(unix)]
pub mod unix;

pub use auth::{Authenticator, TokenAuthenticator};
pub use connection::{ConnectionId, ErrorHook, ListenOutcome, Messenger, MessengerBuilder, Side};
pub use dispatcher::{AUTHENTICATION_FAILED, AuthenticatorSlot, DispatchError, Dispatcher};
pub use receptor::{Args, ExternalError, ParamSpec, Receptor, ReceptorRegistry};
pub use transport::{AsyncReader, AsyncWriter, Frame, FrameReader, FrameWriter};
