//! Per-route settings and the layering of handler defaults under explicit choices.

use serde::{Deserialize, Serialize};

/// How the route wants the request payload delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadOutput {
    /// The host reads the payload and hands it over as data.
    #[default]
    Data,
    /// The handler consumes the raw request stream itself.
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadSettings {
    /// Parse JSON payloads into [`Context::payload`](crate::context::Context::payload).
    pub parse: bool,
    pub output: PayloadOutput,
}

impl Default for PayloadSettings {
    fn default() -> Self {
        Self {
            parse: true,
            output: PayloadOutput::Data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Parse `Cookie` headers into [`Context::cookies`](crate::context::Context::cookies).
    pub parse: bool,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self { parse: true }
    }
}

/// Effective settings of a registered route.
///
/// # Examples
///
/// ```
/// use rttp_mount::router::{RouteSettings, SettingsOverride};
///
/// let settings: RouteSettings = serde_json::from_str(r#"{"state":{"parse":false}}"#).unwrap();
/// assert!(settings.payload.parse);
/// assert!(!settings.state.parse);
///
/// let merged = settings.merged(&SettingsOverride::default().payload_parse(false));
/// assert!(!merged.payload.parse);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    pub payload: PayloadSettings,
    pub state: StateSettings,
}

impl RouteSettings {
    /// Returns a copy with every field set in `patch` replaced.
    #[must_use]
    pub fn merged(mut self, patch: &SettingsOverride) -> Self {
        if let Some(parse) = patch.payload_parse {
            self.payload.parse = parse;
        }
        if let Some(output) = patch.payload_output {
            self.payload.output = output;
        }
        if let Some(parse) = patch.state_parse {
            self.state.parse = parse;
        }
        self
    }
}

/// A partial set of route settings; `None` leaves the underlying value alone.
///
/// Handler types publish their defaults as an override, and route declarations
/// carry the caller's explicit choices as another one layered on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverride {
    pub payload_parse: Option<bool>,
    pub payload_output: Option<PayloadOutput>,
    pub state_parse: Option<bool>,
}

impl SettingsOverride {
    #[must_use]
    pub fn payload_parse(mut self, parse: bool) -> Self {
        self.payload_parse = Some(parse);
        self
    }

    #[must_use]
    pub fn payload_output(mut self, output: PayloadOutput) -> Self {
        self.payload_output = Some(output);
        self
    }

    #[must_use]
    pub fn state_parse(mut self, parse: bool) -> Self {
        self.state_parse = Some(parse);
        self
    }
}
