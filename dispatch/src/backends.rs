//! Backend Registry
//!
//! Maps each [`ToolCategory`] to the base URL of the backend that serves it.
//! The registry is built once at startup from configuration and remains
//! immutable during request processing.

use crate::config::{BackendsConfig, ValidationError};
use crate::tools::ToolCategory;
use url::Url;

/// A single backend processing service
#[derive(Clone, Debug, PartialEq)]
pub struct BackendTarget {
    pub category: ToolCategory,
    /// Base URL; `/health` and `/process/<tool>` are resolved against it
    pub base_url: Url,
}

impl BackendTarget {
    pub fn health_url(&self) -> Url {
        self.join("health")
    }

    pub fn process_url(&self, tool_name: &str) -> Url {
        self.join(&format!("process/{tool_name}"))
    }

    fn join(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}/{path}"));
        url
    }
}

/// One backend per category, indexed by [`ToolCategory::index`]
#[derive(Clone, Debug)]
pub struct BackendRegistry {
    targets: [BackendTarget; 5],
}

impl BackendRegistry {
    pub fn try_new(config: &BackendsConfig) -> Result<Self, ValidationError> {
        let target = |category: ToolCategory| -> Result<BackendTarget, ValidationError> {
            let base_url = config.url_for(category).clone();
            if !matches!(base_url.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidBackendUrl(category, base_url.to_string()));
            }
            Ok(BackendTarget { category, base_url })
        };

        Ok(Self {
            targets: [
                target(ToolCategory::Pdf)?,
                target(ToolCategory::Image)?,
                target(ToolCategory::Media)?,
                target(ToolCategory::Government)?,
                target(ToolCategory::Developer)?,
            ],
        })
    }

    pub fn get(&self, category: ToolCategory) -> &BackendTarget {
        &self.targets[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendTarget> {
        self.targets.iter()
    }
}
