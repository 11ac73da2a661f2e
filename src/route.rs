//! Route identity: the `(area, controller, action)` triple a handler is
//! registered under.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Why a handler name could not be resolved into a [`RouteIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Fewer than three dot-separated segments
    #[error("handler name '{0}' must have the form Area.Controller.Action")]
    TooFewSegments(String),

    /// More than three dot-separated segments
    #[error("handler name '{0}' has more than three segments")]
    TooManySegments(String),

    /// One of the segments is empty
    #[error("handler name '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// The authorization key of a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteIdentity {
    /// Area segment
    pub area: String,
    /// Controller segment
    pub controller: String,
    /// Action segment
    pub action: String,
}

impl RouteIdentity {
    /// Build an identity from already-split parts.
    #[must_use]
    pub fn new(
        area: impl Into<String>,
        controller: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            area: area.into(),
            controller: controller.into(),
            action: action.into(),
        }
    }

    /// Parse `"Area.Controller.Action"`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] for fewer or more than three segments, or any
    /// empty segment.
    pub fn parse(handler_name: &str) -> Result<Self, RouteError> {
        let segments: Vec<&str> = handler_name.split('.').collect();
        match segments.as_slice() {
            [area, controller, action] => {
                if area.is_empty() || controller.is_empty() || action.is_empty() {
                    return Err(RouteError::EmptySegment(handler_name.to_string()));
                }
                Ok(Self::new(*area, *controller, *action))
            }
            s if s.len() < 3 => Err(RouteError::TooFewSegments(handler_name.to_string())),
            _ => Err(RouteError::TooManySegments(handler_name.to_string())),
        }
    }
}

impl FromStr for RouteIdentity {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RouteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area, self.controller, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segments() {
        let route = RouteIdentity::parse("Shop.Orders.List").unwrap();
        assert_eq!(route, RouteIdentity::new("Shop", "Orders", "List"));
        assert_eq!(route.to_string(), "Shop.Orders.List");
    }

    #[test]
    fn rejects_short_names() {
        assert_eq!(
            RouteIdentity::parse("Orders.List"),
            Err(RouteError::TooFewSegments("Orders.List".to_string()))
        );
        assert!(matches!(
            RouteIdentity::parse(""),
            Err(RouteError::TooFewSegments(_))
        ));
    }

    #[test]
    fn rejects_extra_segments() {
        assert!(matches!(
            "Shop.Orders.List.Extra".parse::<RouteIdentity>(),
            Err(RouteError::TooManySegments(_))
        ));
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(matches!(
            RouteIdentity::parse("Shop..List"),
            Err(RouteError::EmptySegment(_))
        ));
        assert!(matches!(
            RouteIdentity::parse(".Orders.List"),
            Err(RouteError::EmptySegment(_))
        ));
    }
}
