//! Declared properties of a handler unit, prior to validation.

use super::HandlerKind;
use super::error::ValidationError;

/// Raw properties extracted from a source location.
///
/// Produced by a loader (e.g. by evaluating a script's top-level
/// declarations) and checked by [`HandlerManifest::validate`] before a
/// [`HandlerUnit`](super::HandlerUnit) is built from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerManifest {
    /// Declared `name`.
    pub name: Option<String>,
    /// Declared human-readable `description`.
    pub description: Option<String>,
    /// Declared alternate names.
    pub aliases: Vec<String>,
    /// Declared `once` flag.
    pub once: bool,
    /// Whether the source defines an `execute` entry point.
    pub has_execute: bool,
}

impl HandlerManifest {
    /// Check the required properties for `kind`.
    ///
    /// Commands need `name`, `description` and `execute`; events need `name`
    /// and `execute`. Every missing field is reported at once.
    pub fn validate(&self, kind: HandlerKind) -> Result<(), ValidationError> {
        let mut missing = Vec::new();

        if is_blank(self.name.as_deref()) {
            missing.push("name");
        }
        if kind == HandlerKind::Command && is_blank(self.description.as_deref()) {
            missing.push("description");
        }
        if !self.has_execute {
            missing.push("execute");
        }

        if !missing.is_empty() {
            return Err(ValidationError::MissingFields { missing });
        }

        let name = self.name.as_deref().unwrap_or_default();
        if name.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidField {
                field: "name",
                reason: format!("`{name}` contains whitespace"),
            });
        }

        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> HandlerManifest {
        HandlerManifest {
            name: Some(name.to_string()),
            description: Some("does things".to_string()),
            has_execute: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_command_requires_description() {
        let mut m = manifest("ping");
        m.description = None;

        let err = m.validate(HandlerKind::Command).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields {
                missing: vec!["description"]
            }
        );
        assert!(m.validate(HandlerKind::Event).is_ok());
    }

    #[test]
    fn test_reports_every_missing_field() {
        let m = HandlerManifest::default();
        let err = m.validate(HandlerKind::Command).unwrap_err();
        assert_eq!(err.to_string(), "missing required field(s): name, description, execute");
    }

    #[test]
    fn test_blank_name_is_missing() {
        let m = manifest("   ");
        assert!(matches!(
            m.validate(HandlerKind::Event),
            Err(ValidationError::MissingFields { .. })
        ));
    }

    #[test]
    fn test_name_with_whitespace_is_invalid() {
        let m = manifest("two words");
        assert!(matches!(
            m.validate(HandlerKind::Command),
            Err(ValidationError::InvalidField { field: "name", .. })
        ));
    }
}
