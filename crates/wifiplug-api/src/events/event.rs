// Received events and the name-keyed payload decoder registry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

type TypedData = Arc<dyn Any + Send + Sync>;
type Decoder = Arc<dyn Fn(&serde_json::Value) -> Result<TypedData, serde_json::Error> + Send + Sync>;

// ── Event ────────────────────────────────────────────────────────────

/// An event pushed by the server for one of the active subscriptions.
///
/// `data` always holds the raw JSON payload. When a decoder is registered
/// for the event's name, the decoded value is also available through
/// [`Event::data_as`].
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    #[serde(default, alias = "UUID", alias = "uuid")]
    pub uuid: Option<Uuid>,

    /// Event name, e.g. `"characteristic_change"`.
    #[serde(alias = "name")]
    pub name: String,

    /// Type of the originating resource, e.g. `"device"`.
    #[serde(alias = "resource_type")]
    pub resource_type: String,

    /// Identifier of the originating resource.
    #[serde(default, alias = "resource")]
    pub resource: String,

    #[serde(default, alias = "timestamp")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, alias = "Payload", alias = "data", alias = "payload")]
    pub data: serde_json::Value,

    #[serde(skip)]
    typed: Option<TypedData>,
}

impl Event {
    /// The decoded payload, if a decoder for this event's name produced a `T`.
    pub fn data_as<T: Any>(&self) -> Option<&T> {
        self.typed.as_deref()?.downcast_ref::<T>()
    }

    /// Whether a registered decoder produced a typed payload.
    pub fn is_typed(&self) -> bool {
        self.typed.is_some()
    }

    /// Deserialize the raw payload into `T`, regardless of the registry.
    pub fn deserialize_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("resource_type", &self.resource_type)
            .field("resource", &self.resource)
            .field("timestamp", &self.timestamp)
            .field("data", &self.data)
            .field("typed", &self.typed.is_some())
            .finish()
    }
}

// ── EventDataRegistry ────────────────────────────────────────────────

/// Maps event names to payload types.
///
/// Lookups happen once per received event. Names without a decoder keep
/// the untyped JSON payload, so new server-side events never break the
/// stream.
#[derive(Clone, Default)]
pub struct EventDataRegistry {
    decoders: HashMap<String, Decoder>,
}

impl EventDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode payloads of events named `name` into `T`.
    ///
    /// Registering a name twice replaces the earlier decoder.
    pub fn register<T>(&mut self, name: impl Into<String>) -> &mut Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let decoder: Decoder = Arc::new(|value: &serde_json::Value| {
            let decoded = T::deserialize(value)?;
            Ok(Arc::new(decoded) as TypedData)
        });
        self.decoders.insert(name.into(), decoder);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Attach the typed payload to `event`. A failed decode is logged and
    /// leaves the raw payload in place.
    pub(crate) fn resolve(&self, event: &mut Event) {
        let Some(decoder) = self.decoders.get(&event.name) else {
            return;
        };

        match decoder(&event.data) {
            Ok(typed) => event.typed = Some(typed),
            Err(e) => {
                tracing::warn!(
                    name = %event.name,
                    error = %e,
                    "Could not decode event payload, keeping raw data"
                );
            }
        }
    }
}

impl fmt::Debug for EventDataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}
