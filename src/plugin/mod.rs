//! Plugins and the realms they register into.
//!
//! A plugin is a named bundle of routes and handler types. When the server
//! registers one it hands the plugin a [`Realm`]: a view of the server whose
//! routes all land under the realm's prefix. Plugins may register further
//! plugins through their realm; prefixes of nested registrations concatenate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::router::{HandlerFactory, RouteConfig};
use crate::server::{Server, ServerError, normalize_prefix};

/// Identity of a plugin.
///
/// # Examples
///
/// ```
/// use rttp_mount::plugin::PluginAttributes;
///
/// let attrs = PluginAttributes::from("admin").version("1.2.0").once(true);
/// assert_eq!(attrs.name, "admin");
/// assert!(attrs.once);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginAttributes {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Registering the plugin again is a silent no-op instead of an error.
    #[serde(default)]
    pub once: bool,
}

impl PluginAttributes {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            once: false,
        }
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }
}

impl From<&str> for PluginAttributes {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for PluginAttributes {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Something that can be registered on a [`Server`].
pub trait Plugin: Send + Sync {
    fn attributes(&self) -> PluginAttributes;

    /// Declares the plugin's routes and handler types on `realm`.
    ///
    /// # Errors
    ///
    /// Whatever declaring them reports; registration stops at the first error.
    fn register(&self, realm: &mut Realm<'_>) -> Result<(), ServerError>;
}

/// Options for [`Server::register_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOptions {
    /// Prefix applied to every route the plugin declares, e.g. `/api`.
    pub prefix: Option<String>,
}

impl RegisterOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

/// The server as seen by one plugin registration.
pub struct Realm<'a> {
    server: &'a mut Server,
    prefix: Option<String>,
}

impl<'a> Realm<'a> {
    pub(crate) fn new(server: &'a mut Server, prefix: Option<String>) -> Self {
        Self { server, prefix }
    }

    /// The prefix routes declared here land under; `None` at the root.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Adds a route under this realm's prefix.
    ///
    /// # Errors
    ///
    /// As for [`Server::route`].
    pub fn route(&mut self, config: RouteConfig) -> Result<(), ServerError> {
        let prefix = self.prefix.clone();
        self.server.route_in(config, prefix.as_deref())
    }

    /// Registers a named handler type; handler types are server-wide.
    ///
    /// # Errors
    ///
    /// As for [`Server::handler`].
    pub fn handler(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<(), ServerError> {
        self.server.handler(name, factory)
    }

    /// Registers a nested plugin inheriting this realm's prefix.
    ///
    /// # Errors
    ///
    /// As for [`Server::register`].
    pub fn register(&mut self, plugin: &dyn Plugin) -> Result<(), ServerError> {
        self.register_with(plugin, RegisterOptions::default())
    }

    /// Registers a nested plugin under this realm's prefix followed by `options.prefix`.
    ///
    /// # Errors
    ///
    /// As for [`Server::register`].
    pub fn register_with(
        &mut self,
        plugin: &dyn Plugin,
        options: RegisterOptions,
    ) -> Result<(), ServerError> {
        let nested = options.prefix.as_deref().and_then(normalize_prefix);
        let prefix = match (self.prefix.as_deref(), nested) {
            (Some(outer), Some(inner)) => Some(format!("{outer}{inner}")),
            (Some(outer), None) => Some(outer.to_owned()),
            (None, inner) => inner,
        };
        self.server.register_in(plugin, prefix)
    }
}
