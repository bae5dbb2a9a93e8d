//! Routes carried in LRP metadata.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An HTTP route: the hostname the router serves and the container port it
/// forwards to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Route {
    pub hostname: String,
    pub port: u16,
}

impl Route {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

/// Route metadata could not be decoded.
#[derive(Debug, Error)]
#[error("invalid route metadata: {0}")]
pub struct RouteError(#[from] serde_json::Error);

/// Parses the serialized route list stored under [`crate::metadata::ROUTES`].
///
/// Routes without a hostname are dropped. An empty or whitespace-only input
/// means "no routes".
pub fn parse_routes(raw: &str) -> Result<Vec<Route>, RouteError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let routes: Vec<Route> = serde_json::from_str(raw)?;
    Ok(routes
        .into_iter()
        .filter(|r| !r.hostname.is_empty())
        .collect())
}

/// Serializes routes into their metadata form.
pub fn serialize_routes(routes: &[Route]) -> String {
    serde_json::to_string(routes).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_routes() {
        let routes =
            parse_routes(r#"[{"hostname":"foo.example.com","port":8080},{"hostname":"bar.example.com","port":9000}]"#)
                .unwrap();
        assert_eq!(
            routes,
            vec![
                Route::new("foo.example.com", 8080),
                Route::new("bar.example.com", 9000)
            ]
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("[]")]
    #[case(r#"[{"hostname":"","port":8080}]"#)]
    fn test_parse_routes_empty(#[case] raw: &str) {
        assert!(parse_routes(raw).unwrap().is_empty());
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"hostname":"foo","port":8080}"#)]
    #[case(r#"[{"hostname":"foo","port":-1}]"#)]
    fn test_parse_routes_malformed(#[case] raw: &str) {
        assert!(parse_routes(raw).is_err());
    }

    #[test]
    fn test_serialize_routes() {
        let raw = serialize_routes(&[Route::new("foo.example.com", 8080)]);
        assert_eq!(raw, r#"[{"hostname":"foo.example.com","port":8080}]"#);
    }
}
