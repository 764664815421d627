use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Query/body/path key the upstream API uses for tenant context.
pub const LOCATION_PARAM: &str = "locationId";

/// Where the installation's `location_id` goes in the outbound request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationInjection {
    #[default]
    None,
    /// Fills the `:locationId` placeholder of the path template.
    Path,
    Query,
    /// Sets the `locationId` field of the JSON request body.
    Body,
}

/// One upstream route, addressed by a logical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: String,
    #[serde(with = "method_serde")]
    pub method: Method,
    /// Upstream path with `:name` placeholders, e.g. `/products/:productId`.
    pub path_template: String,
    #[serde(default)]
    pub location_injection: LocationInjection,
    /// Documentation and pre-flight diagnostics only.
    #[serde(default)]
    pub required_scope: Option<String>,
}

impl EndpointDescriptor {
    pub fn new(
        name: &str,
        method: Method,
        path_template: &str,
        location_injection: LocationInjection,
        required_scope: Option<&str>,
    ) -> Self {
        Self {
            name: name.to_string(),
            method,
            path_template: path_template.to_string(),
            location_injection,
            required_scope: required_scope.map(str::to_string),
        }
    }

    /// Placeholder names in template order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.path_template
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
    }
}

mod method_serde {
    use reqwest::Method;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(method: &Method, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Method, D::Error> {
        let raw = String::deserialize(d)?;
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(D::Error::custom)
    }
}
