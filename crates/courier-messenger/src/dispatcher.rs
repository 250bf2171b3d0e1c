//! Inbound request dispatch
//!
//! Turns a request into exactly one response:
//! - authentication failure: error `Authentication failed`
//! - no matching receptor: silent no-op (`object: null, error: false`)
//! - bad or missing parameters: error with the decode failure, verbatim
//! - handler failure: logged locally, caller sees only `Internal Error: ...`
//! - otherwise: success with the handler's return value

use crate::auth::Authenticator;
use crate::connection::Messenger;
use crate::receptor::{ExternalError, ReceptorRegistry};
use courier_core::{CourierError, Request, Response};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cause reported for requests rejected by the authenticator
pub const AUTHENTICATION_FAILED: &str = "Authentication failed";

/// Shared, replaceable authenticator
pub type AuthenticatorSlot = Arc<RwLock<Option<Arc<dyn Authenticator>>>>;

/// Why a request could not be answered successfully
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// The caller's fault; the text is sent back as is
    #[error("{0}")]
    External(String),
    /// The callee's fault; the text stays local
    #[error("{0}")]
    Internal(String),
}

impl DispatchError {
    /// Cause as disclosed to the remote peer
    pub fn cause(&self, method: &str) -> String {
        match self {
            DispatchError::External(cause) => cause.clone(),
            DispatchError::Internal(_) => format!("Internal Error: receptor '{}' failed", method),
        }
    }
}

/// Receptors plus an optional authentication gate
#[derive(Clone)]
pub struct Dispatcher {
    receptors: Arc<ReceptorRegistry>,
    authenticator: AuthenticatorSlot,
}

impl Dispatcher {
    pub fn new(receptors: Arc<ReceptorRegistry>) -> Self {
        Self {
            receptors,
            authenticator: Arc::new(RwLock::new(None)),
        }
    }

    /// Share an authenticator slot with other dispatchers
    pub fn with_authenticator_slot(mut self, slot: AuthenticatorSlot) -> Self {
        self.authenticator = slot;
        self
    }

    pub fn receptors(&self) -> &Arc<ReceptorRegistry> {
        &self.receptors
    }

    pub async fn set_authenticator(&self, authenticator: Option<Arc<dyn Authenticator>>) {
        *self.authenticator.write().await = authenticator;
    }

    /// Answer one inbound request
    pub async fn accept_request(&self, connection: &Arc<Messenger>, request: Request) -> Response {
        let id = request.id;
        let method = request.method.clone();
        match self.dispatch(connection, request).await {
            Ok(object) => Response::success(id, object),
            Err(DispatchError::External(cause)) => {
                debug!("Request {} ({}) rejected: {}", id, method, cause);
                Response::failure(id, cause)
            }
            Err(err @ DispatchError::Internal(_)) => {
                connection.report(&CourierError::ReceptorFailed {
                    method: method.clone(),
                    cause: err.to_string(),
                });
                Response::failure(id, err.cause(&method))
            }
        }
    }

    async fn dispatch(
        &self,
        connection: &Arc<Messenger>,
        request: Request,
    ) -> Result<Option<Value>, DispatchError> {
        let authenticator = self.authenticator.read().await.clone();
        if let Some(authenticator) = authenticator {
            if !authenticator.is_authenticated(connection, &request) {
                warn!(
                    "Unauthenticated request {} ({}) from {}",
                    request.id,
                    request.method,
                    connection.peer()
                );
                return Err(DispatchError::External(AUTHENTICATION_FAILED.into()));
            }
        }

        let Some(receptor) = self.receptors.find(&request.method) else {
            debug!("No receptor for '{}', answering with no-op", request.method);
            return Ok(None);
        };

        let args = receptor
            .resolve(connection, &request.parameters)
            .map_err(DispatchError::External)?;

        // Run on its own task so a panicking handler becomes an error
        let invocation = tokio::spawn(receptor.invoke(args));
        let result = invocation.await.map_err(|e| {
            if e.is_panic() {
                DispatchError::Internal("handler panicked".into())
            } else {
                DispatchError::Internal(format!("handler task failed: {}", e))
            }
        })?;

        match result {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(err) => match err.downcast_ref::<ExternalError>() {
                Some(external) => Err(DispatchError::External(external.0.clone())),
                None => Err(DispatchError::Internal(format!("{:#}", err))),
            },
        }
    }
}
