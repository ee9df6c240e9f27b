// ABOUTME: Static template registry mapping template names to runtime images
// ABOUTME: Templates form a closed set; unknown names are a user error

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::SandboxError;

/// A named preset selecting the container image for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    Python,
    Node,
    Go,
}

impl Template {
    /// Image reference this template resolves to.
    pub fn image(&self) -> &'static str {
        match self {
            Template::Python => "python:3.11-slim",
            Template::Node => "node:20-slim",
            Template::Go => "golang:1.22-alpine",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Template::Python => "python",
            Template::Node => "node",
            Template::Go => "go",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Template {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Template::Python),
            "node" => Ok(Template::Node),
            "go" => Ok(Template::Go),
            other => Err(SandboxError::InvalidParams(format!(
                "unknown template: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_templates() {
        assert_eq!("python".parse::<Template>().unwrap(), Template::Python);
        assert_eq!("node".parse::<Template>().unwrap(), Template::Node);
        assert_eq!("go".parse::<Template>().unwrap(), Template::Go);
    }

    #[test]
    fn test_parse_unknown_template() {
        let err = "ruby".parse::<Template>().unwrap_err();
        assert!(matches!(err, SandboxError::InvalidParams(_)));
    }

    #[test]
    fn test_image_mapping() {
        assert_eq!(Template::Python.image(), "python:3.11-slim");
        assert_eq!(Template::Node.image(), "node:20-slim");
        assert_eq!(Template::Go.image(), "golang:1.22-alpine");
    }

    #[test]
    fn test_round_trips_through_str() {
        for t in [Template::Python, Template::Node, Template::Go] {
            assert_eq!(t.as_str().parse::<Template>().unwrap(), t);
        }
    }
}
