//! Route registration messages and their router wire form.

use serde::{Deserialize, Serialize};

use crate::EventError;

/// Router subjects on the message bus.
pub mod subjects {
    pub const REGISTER: &str = "router.register";
    pub const UNREGISTER: &str = "router.unregister";
}

/// Hostnames to register and unregister for one instance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Routes {
    #[serde(default)]
    pub registered_routes: Vec<String>,
    #[serde(default)]
    pub unregistered_routes: Vec<String>,
}

/// A route change for a single instance endpoint.
///
/// `instance_id` is the pod name and `name` is the app GUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMessage {
    pub instance_id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tls_port: u16,
    pub routes: Routes,
}

impl RouteMessage {
    /// Creates a message for an endpoint with no routes yet.
    pub fn new(
        instance_id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tls_port: 0,
            routes: Routes::default(),
        }
    }

    #[must_use]
    pub fn with_registered(mut self, hostnames: Vec<String>) -> Self {
        self.routes.registered_routes = hostnames;
        self
    }

    #[must_use]
    pub fn with_unregistered(mut self, hostnames: Vec<String>) -> Self {
        self.routes.unregistered_routes = hostnames;
        self
    }

    /// Returns true if the message carries no routes on either side.
    pub fn is_empty(&self) -> bool {
        self.routes.registered_routes.is_empty() && self.routes.unregistered_routes.is_empty()
    }

    /// Builds the router payloads for this message, one per non-empty side.
    pub fn registry_messages(&self) -> Vec<(&'static str, RegistryMessage)> {
        let mut out = Vec::with_capacity(2);

        if !self.routes.registered_routes.is_empty() {
            out.push((
                subjects::REGISTER,
                self.registry_message(self.routes.registered_routes.clone()),
            ));
        }

        if !self.routes.unregistered_routes.is_empty() {
            out.push((
                subjects::UNREGISTER,
                self.registry_message(self.routes.unregistered_routes.clone()),
            ));
        }

        out
    }

    /// Encodes the router payloads of this message as JSON.
    pub fn encode(&self) -> Result<Vec<(&'static str, Vec<u8>)>, EventError> {
        if self.is_empty() {
            return Err(EventError::EmptyRoutes {
                instance_id: self.instance_id.clone(),
            });
        }

        self.registry_messages()
            .into_iter()
            .map(|(subject, payload)| Ok((subject, serde_json::to_vec(&payload)?)))
            .collect()
    }

    fn registry_message(&self, uris: Vec<String>) -> RegistryMessage {
        RegistryMessage {
            host: self.address.clone(),
            port: self.port,
            tls_port: self.tls_port,
            uris,
            app: self.name.clone(),
            private_instance_id: self.instance_id.clone(),
        }
    }
}

/// Payload understood by the HTTP router on `router.register` and
/// `router.unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMessage {
    pub host: String,
    pub port: u16,
    pub tls_port: u16,
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_instance_id: String,
}
