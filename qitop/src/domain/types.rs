//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep method ids, correlation ids and action names
//! from being mixed up in function signatures.

use std::fmt;

use qitop_common::ignore_action;

/// Method id on a remote object
///
/// Also called the *slot* when a trace correlator is filtering on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl MethodId {
    /// Returns true if this id belongs to the bus-internal range
    #[must_use]
    pub fn is_ignored(self) -> bool {
        ignore_action(self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Correlation id shared by a call and its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub u32);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Fully qualified `service.method` name
///
/// The split point is the first `.`: service names never contain one, while
/// method names may.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action(String);

impl Action {
    #[must_use]
    pub fn new(service: &str, method: &str) -> Self {
        Self(format!("{service}.{method}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn service(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(service, _)| service)
    }

    #[must_use]
    pub fn method(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, method)| method)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_id_ignored_range() {
        assert!(MethodId(0x51).is_ignored());
        assert!(!MethodId(0x54).is_ignored());
        assert_eq!(MethodId(100).to_string(), "#100");
    }

    #[test]
    fn test_action_split() {
        let action = Action::new("Camera", "getImage");
        assert_eq!(action.as_str(), "Camera.getImage");
        assert_eq!(action.service(), "Camera");
        assert_eq!(action.method(), "getImage");
    }

    #[test]
    fn test_action_keeps_dots_in_method() {
        let action = Action::new("Logger", "log.v2");
        assert_eq!(action.service(), "Logger");
        assert_eq!(action.method(), "log.v2");
    }
}
