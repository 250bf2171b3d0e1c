//! Request authentication
//!
//! An authenticator gates every inbound request before dispatch. A request
//! that fails the check is answered with `Authentication failed` and never
//! reaches a receptor.

use crate::connection::Messenger;
use courier_core::Request;
use std::fmt;

/// Decides whether an inbound request may be dispatched
pub trait Authenticator: Send + Sync + 'static {
    fn is_authenticated(&self, connection: &Messenger, request: &Request) -> bool;
}

impl<F> Authenticator for F
where
    F: Fn(&Messenger, &Request) -> bool + Send + Sync + 'static,
{
    fn is_authenticated(&self, connection: &Messenger, request: &Request) -> bool {
        self(connection, request)
    }
}

/// Checks a shared secret carried as a request parameter
#[derive(Clone)]
pub struct TokenAuthenticator {
    token: String,
    param: String,
}

impl TokenAuthenticator {
    /// Parameter name the token is read from by default
    pub const DEFAULT_PARAM: &'static str = "token";

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            param: Self::DEFAULT_PARAM.to_string(),
        }
    }

    /// Read the token from a different parameter
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }
}

impl Authenticator for TokenAuthenticator {
    fn is_authenticated(&self, _connection: &Messenger, request: &Request) -> bool {
        request
            .parameters
            .get(&self.param)
            .and_then(|v| v.as_str())
            .is_some_and(|provided| constant_time_eq(&self.token, provided))
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("token", &"*****")
            .field("param", &self.param)
            .finish()
    }
}

/// Compare without short-circuiting on the first differing byte
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secrets"));
    }

    #[test]
    fn test_debug_hides_token() {
        let auth = TokenAuthenticator::new("hunter2");
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
