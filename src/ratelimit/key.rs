//! Rate limit key generation.

/// Marker used in place of the endpoint for a service-wide default.
///
/// Escaped components never contain `*`, so no endpoint can be mistaken for it.
const DEFAULT_MARKER: &str = "*";

/// A key that uniquely identifies one (service, endpoint) limiter.
///
/// Both components are escaped so that `:` stays an unambiguous separator:
/// two different pairs always produce two different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The service this limiter belongs to
    pub service: String,
    /// The endpoint, or `None` for the service default
    pub endpoint: Option<String>,
}

impl RateLimitKey {
    /// Key for a specific endpoint of a service.
    pub fn endpoint(service: &str, endpoint: &str) -> Self {
        Self {
            service: service.to_string(),
            endpoint: Some(endpoint.to_string()),
        }
    }

    /// Key for the service-wide default.
    pub fn service_default(service: &str) -> Self {
        Self {
            service: service.to_string(),
            endpoint: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.endpoint.is_none()
    }

    /// Convert the key to its escaped string form.
    pub fn to_string_key(&self) -> String {
        let endpoint = match &self.endpoint {
            Some(endpoint) => escape(endpoint),
            None => DEFAULT_MARKER.to_string(),
        };
        format!("{}:{}", escape(&self.service), endpoint)
    }

    /// Store key holding the published configuration for this pair.
    pub fn config_key(&self, prefix: &str) -> String {
        format!("{}:config:{}", prefix, self.to_string_key())
    }

    /// Store key holding one piece of algorithm state for this pair.
    pub fn state_key(&self, prefix: &str, part: &str) -> String {
        format!("{}:state:{}:{}", prefix, self.to_string_key(), part)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            c => out.push(c),
        }
    }
    out
}
