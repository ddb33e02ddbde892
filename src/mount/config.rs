use std::sync::Arc;

use crate::app::{App, FrameworkFactory, Service, SharedService};
use crate::raw::StreamError;

/// How the bridge treats an error emitted on the raw response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A system-level failure the server operator must hear about.
    Operational,
    /// Normal control flow of the inner app; the request is simply over.
    Expected,
}

/// Decides the [`ErrorClass`] of a stream error.
pub type Classifier = Arc<dyn Fn(&StreamError) -> ErrorClass + Send + Sync>;

/// The default policy: transport failures are operational, everything else is expected.
pub fn default_classifier(error: &StreamError) -> ErrorClass {
    match error {
        StreamError::Io { .. } => ErrorClass::Operational,
        StreamError::Aborted
        | StreamError::Application(_)
        | StreamError::HeadersSent
        | StreamError::WriteAfterEnd => ErrorClass::Expected,
    }
}

/// Configuration of one mounted inner app.
///
/// # Examples
///
/// ```
/// use rttp_mount::app::App;
/// use rttp_mount::mount::{ErrorClass, MountConfig};
///
/// let config = MountConfig::new(App::new())
///     .framework(App::new)
///     .classifier(|_err| ErrorClass::Expected);
/// ```
#[derive(Clone)]
pub struct MountConfig {
    pub(crate) app: SharedService,
    pub(crate) framework: Option<FrameworkFactory>,
    pub(crate) classifier: Classifier,
}

impl MountConfig {
    pub fn new(app: impl Service) -> Self {
        Self::from_shared(Arc::new(app))
    }

    pub fn from_shared(app: SharedService) -> Self {
        Self {
            app,
            framework: None,
            classifier: Arc::new(default_classifier),
        }
    }

    /// Builds the wrapping framework instance; [`App::new`] when unset.
    #[must_use]
    pub fn framework(mut self, factory: impl Fn() -> App + Send + Sync + 'static) -> Self {
        self.framework = Some(Arc::new(factory));
        self
    }

    /// Replaces [`default_classifier`].
    #[must_use]
    pub fn classifier(
        mut self,
        classifier: impl Fn(&StreamError) -> ErrorClass + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub(crate) fn build_framework(&self) -> App {
        self.framework.as_ref().map_or_else(App::new, |factory| factory())
    }
}

impl From<SharedService> for MountConfig {
    fn from(app: SharedService) -> Self {
        Self::from_shared(app)
    }
}

impl From<App> for MountConfig {
    fn from(app: App) -> Self {
        Self::new(app)
    }
}

impl std::fmt::Debug for MountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountConfig")
            .field("custom_framework", &self.framework.is_some())
            .finish_non_exhaustive()
    }
}
