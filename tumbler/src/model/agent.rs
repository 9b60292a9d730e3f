//! Execution environment declared by a pipeline or stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The tag appended to images declared without one.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// The declared execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Agent {
    /// Run directly on the host.
    #[default]
    None,
    /// Run inside a container created from `image`.
    Container {
        /// Image reference as written in the source, possibly untagged.
        image: String,
    },
}

impl Agent {
    /// Creates a container agent.
    #[must_use]
    pub fn container(image: impl Into<String>) -> Self {
        Self::Container {
            image: image.into(),
        }
    }

    /// Returns true for a container agent.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container { .. })
    }

    /// Returns the image to execute with, tagged `:latest` when untagged.
    #[must_use]
    pub fn resolved_image(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Container { image } => Some(resolve_image_tag(image)),
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Container { image } => write!(f, "docker {image}"),
        }
    }
}

/// Appends the default tag to an image reference that has none.
///
/// A `:` only counts as a tag separator in the last path segment, so
/// `localhost:5000/app` is untagged. Digest references are left alone.
#[must_use]
pub fn resolve_image_tag(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{image}:{DEFAULT_IMAGE_TAG}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_image_gets_latest() {
        assert_eq!(resolve_image_tag("maven"), "maven:latest");
        assert_eq!(resolve_image_tag("library/node"), "library/node:latest");
    }

    #[test]
    fn test_tagged_image_unchanged() {
        assert_eq!(resolve_image_tag("maven:3.9.0"), "maven:3.9.0");
        assert_eq!(
            resolve_image_tag("localhost:5000/team/app:1.2"),
            "localhost:5000/team/app:1.2"
        );
    }

    #[test]
    fn test_registry_port_is_not_a_tag() {
        assert_eq!(
            resolve_image_tag("localhost:5000/app"),
            "localhost:5000/app:latest"
        );
    }

    #[test]
    fn test_digest_reference_unchanged() {
        let image = "alpine@sha256:abcdef";
        assert_eq!(resolve_image_tag(image), image);
    }

    #[test]
    fn test_agent_resolved_image() {
        assert_eq!(Agent::None.resolved_image(), None);
        assert_eq!(
            Agent::container("openjdk").resolved_image().as_deref(),
            Some("openjdk:latest")
        );
    }

    #[test]
    fn test_agent_serialize() {
        let json = serde_json::to_value(Agent::container("alpine:3")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "container", "image": "alpine:3"}));
    }
}
