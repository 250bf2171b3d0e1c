//! Receptor registry
//!
//! A receptor is a named remote operation with an ordered list of typed
//! parameters. Parameters are decoded from the request's JSON before the
//! handler runs, so the handler only ever sees values of its declared
//! types.
//!
//! # Example
//!
//! ```ignore
//! let mut receptors = ReceptorRegistry::new();
//! receptors.register("person", vec![ParamSpec::of::<u32>("id")], |mut args| async move {
//!     let id: u32 = args.take("id")?;
//!     Ok(Person { id, name: "Steve".into() })
//! });
//! ```

use crate::connection::Messenger;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Boxed future for handler results
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type DecodeFn = fn(Value) -> Result<Box<dyn Any + Send>, serde_json::Error>;

type Handler = Arc<dyn Fn(Args) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

fn decode_as<T: DeserializeOwned + Send + 'static>(
    value: Value,
) -> Result<Box<dyn Any + Send>, serde_json::Error> {
    serde_json::from_value::<T>(value).map(|v| Box::new(v) as Box<dyn Any + Send>)
}

/// Caller-fault failure raised by a handler.
///
/// Return it through `anyhow` and its text reaches the caller verbatim;
/// any other handler error is reported as an internal error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ExternalError(pub String);

impl ExternalError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}

#[derive(Clone)]
enum ParamKind {
    Connection,
    Value {
        type_name: &'static str,
        decode: DecodeFn,
    },
}

/// One declared receptor parameter
#[derive(Clone)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
}

impl ParamSpec {
    /// Parameter decoded from the request's JSON into `T`.
    ///
    /// A missing parameter is decoded from `null`, so `Option<T>` makes it
    /// optional.
    pub fn of<T: DeserializeOwned + Send + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Value {
                type_name: std::any::type_name::<T>(),
                decode: decode_as::<T>,
            },
        }
    }

    /// Parameter bound to the connection the request arrived on, as
    /// `Arc<Messenger>`
    pub fn connection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = match &self.kind {
            ParamKind::Connection => "connection",
            ParamKind::Value { type_name, .. } => type_name,
        };
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("type", &type_name)
            .finish()
    }
}

/// Decoded arguments handed to a handler
pub struct Args {
    connection: Arc<Messenger>,
    values: Vec<(String, Option<Box<dyn Any + Send>>)>,
}

impl Args {
    /// Connection the request arrived on
    pub fn connection(&self) -> &Arc<Messenger> {
        &self.connection
    }

    /// Take a declared argument by name.
    ///
    /// Fails if the name was not declared, was already taken, or `T` is
    /// not the declared type.
    pub fn take<T: 'static>(&mut self, name: &str) -> anyhow::Result<T> {
        let slot = self
            .values
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| anyhow::anyhow!("Undeclared parameter '{}'", name))?;
        let value = slot
            .1
            .take()
            .ok_or_else(|| anyhow::anyhow!("Parameter '{}' already taken", name))?;
        value.downcast::<T>().map(|v| *v).map_err(|_| {
            anyhow::anyhow!(
                "Parameter '{}' is not a {}",
                name,
                std::any::type_name::<T>()
            )
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A registered remote operation
pub struct Receptor {
    method: String,
    params: Vec<ParamSpec>,
    handler: Handler,
}

impl Receptor {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Decode declared parameters; the error text is meant for the caller
    pub fn resolve(
        &self,
        connection: &Arc<Messenger>,
        parameters: &serde_json::Map<String, Value>,
    ) -> Result<Args, String> {
        let mut values = Vec::with_capacity(self.params.len());
        for spec in &self.params {
            let value: Box<dyn Any + Send> = match &spec.kind {
                ParamKind::Connection => Box::new(Arc::clone(connection)),
                ParamKind::Value { type_name, decode } => match parameters.get(&spec.name) {
                    Some(raw) => decode(raw.clone())
                        .map_err(|e| format!("Invalid parameter '{}': {}", spec.name, e))?,
                    None => decode(Value::Null).map_err(|_| {
                        format!("Missing parameter '{}' ({})", spec.name, type_name)
                    })?,
                },
            };
            values.push((spec.name.clone(), Some(value)));
        }

        Ok(Args {
            connection: Arc::clone(connection),
            values,
        })
    }

    /// Start the handler
    pub fn invoke(&self, args: Args) -> BoxFuture<'static, anyhow::Result<Value>> {
        (self.handler)(args)
    }
}

impl fmt::Debug for Receptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receptor")
            .field("method", &self.method)
            .field("params", &self.params)
            .finish()
    }
}

/// Registry of receptors, keyed by lowercased method name
#[derive(Default)]
pub struct ReceptorRegistry {
    receptors: HashMap<String, Arc<Receptor>>,
}

impl ReceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a receptor. A later registration for the same
    /// (case-insensitive) method replaces the earlier one.
    pub fn register<F, Fut, R>(
        &mut self,
        method: &str,
        params: Vec<ParamSpec>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize + 'static,
    {
        let handler: Handler = Arc::new(move |args| {
            let fut = handler(args);
            Box::pin(async move {
                let result = fut.await?;
                Ok(serde_json::to_value(result)?)
            })
        });

        let receptor = Receptor {
            method: method.to_string(),
            params,
            handler,
        };
        if self
            .receptors
            .insert(method.to_lowercase(), Arc::new(receptor))
            .is_some()
        {
            warn!("Receptor '{}' registered twice, keeping the latest", method);
        }
        self
    }

    /// Move every receptor from `other` into this registry
    pub fn add_receptors(&mut self, other: ReceptorRegistry) -> &mut Self {
        for (key, receptor) in other.receptors {
            if self.receptors.insert(key, receptor).is_some() {
                warn!("Receptor replaced while merging registries");
            }
        }
        self
    }

    /// Case-insensitive lookup
    pub fn find(&self, method: &str) -> Option<Arc<Receptor>> {
        self.receptors.get(&method.to_lowercase()).cloned()
    }

    /// Registered method names, as registered
    pub fn methods(&self) -> Vec<&str> {
        self.receptors.values().map(|r| r.method()).collect()
    }

    pub fn len(&self) -> usize {
        self.receptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receptors.is_empty()
    }
}
