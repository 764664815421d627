use std::collections::BTreeSet;

use reqwest::Method;

use super::{GatewayError, Params, ProxyBody};
use crate::models::endpoint::{EndpointDescriptor, LocationInjection, LOCATION_PARAM};

/// Fully-resolved upstream request, independent of the access token so the
/// same value can be re-sent after a refresh.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path with placeholders substituted and percent-encoded.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: ProxyBody,
}

/// Resolve `descriptor` against caller params and the stored tenant location.
///
/// An explicit `locationId` (param, or JSON body field for body injection)
/// always wins over `stored_location`.
pub fn build_request(
    descriptor: &EndpointDescriptor,
    params: &Params,
    body: ProxyBody,
    stored_location: Option<&str>,
) -> Result<OutboundRequest, GatewayError> {
    let injection = descriptor.location_injection;
    let explicit_location = params.get(LOCATION_PARAM).map(String::as_str);
    let location = explicit_location.or(stored_location);
    let mut consumed = BTreeSet::new();

    let mut path = String::with_capacity(descriptor.path_template.len());
    for (i, segment) in descriptor.path_template.split('/').enumerate() {
        if i > 0 {
            path.push('/');
        }
        let Some(name) = segment.strip_prefix(':') else {
            path.push_str(segment);
            continue;
        };
        let value = match params.get(name) {
            Some(v) => v.as_str(),
            None if name == LOCATION_PARAM && injection == LocationInjection::Path => location
                .ok_or_else(|| GatewayError::MissingLocation(descriptor.name.clone()))?,
            None => return Err(GatewayError::MissingParam(name.to_string())),
        };
        path.push_str(&urlencoding::encode(value));
        consumed.insert(name);
    }

    let body = match injection {
        LocationInjection::Body => {
            // the override moves into the body rather than the query string
            consumed.insert(LOCATION_PARAM);
            inject_body_location(descriptor, body, location)?
        }
        _ => body,
    };

    let mut query: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| !consumed.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if injection == LocationInjection::Query && explicit_location.is_none() {
        let location =
            stored_location.ok_or_else(|| GatewayError::MissingLocation(descriptor.name.clone()))?;
        query.push((LOCATION_PARAM.to_string(), location.to_string()));
    }

    Ok(OutboundRequest {
        method: descriptor.method.clone(),
        path,
        query,
        body,
    })
}

fn inject_body_location(
    descriptor: &EndpointDescriptor,
    body: ProxyBody,
    location: Option<&str>,
) -> Result<ProxyBody, GatewayError> {
    let mut object = match body {
        ProxyBody::Empty => serde_json::Map::new(),
        ProxyBody::Json(serde_json::Value::Object(map)) => map,
        ProxyBody::Json(_) | ProxyBody::Raw { .. } => {
            return Err(GatewayError::InvalidBody(format!(
                "endpoint '{}' injects the location into the body and needs a JSON object",
                descriptor.name
            )))
        }
    };

    if !object.contains_key(LOCATION_PARAM) {
        let location =
            location.ok_or_else(|| GatewayError::MissingLocation(descriptor.name.clone()))?;
        object.insert(LOCATION_PARAM.to_string(), location.into());
    }
    Ok(ProxyBody::Json(serde_json::Value::Object(object)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn ep(path: &str, injection: LocationInjection) -> EndpointDescriptor {
        EndpointDescriptor::new("op", Method::GET, path, injection, None)
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_query_injection_appends_stored_location() {
        let req = build_request(
            &ep("/products/:id", LocationInjection::Query),
            &params(&[("id", "abc")]),
            ProxyBody::Empty,
            Some("loc_stored"),
        )
        .unwrap();
        assert_eq!(req.path, "/products/abc");
        assert_eq!(req.query, vec![("locationId".to_string(), "loc_stored".to_string())]);
    }

    #[test]
    fn test_query_injection_prefers_explicit_param() {
        let req = build_request(
            &ep("/products/:id", LocationInjection::Query),
            &params(&[("id", "abc"), ("locationId", "loc_override")]),
            ProxyBody::Empty,
            Some("loc_stored"),
        )
        .unwrap();
        assert_eq!(req.query, vec![("locationId".to_string(), "loc_override".to_string())]);
    }

    #[test]
    fn test_path_injection_and_override() {
        let descriptor = ep("/locations/:locationId/products", LocationInjection::Path);

        let injected =
            build_request(&descriptor, &Params::new(), ProxyBody::Empty, Some("loc_1")).unwrap();
        assert_eq!(injected.path, "/locations/loc_1/products");
        assert!(injected.query.is_empty());

        let overridden = build_request(
            &descriptor,
            &params(&[("locationId", "loc_2")]),
            ProxyBody::Empty,
            Some("loc_1"),
        )
        .unwrap();
        assert_eq!(overridden.path, "/locations/loc_2/products");
        assert!(overridden.query.is_empty());
    }

    #[test]
    fn test_body_injection_sets_field_unless_present() {
        let descriptor = ep("/products/", LocationInjection::Body);

        let req = build_request(
            &descriptor,
            &Params::new(),
            ProxyBody::Json(json!({"name": "Widget"})),
            Some("loc_1"),
        )
        .unwrap();
        match req.body {
            ProxyBody::Json(v) => assert_eq!(v, json!({"name": "Widget", "locationId": "loc_1"})),
            other => panic!("unexpected body: {other:?}"),
        }

        let req = build_request(
            &descriptor,
            &Params::new(),
            ProxyBody::Json(json!({"name": "Widget", "locationId": "loc_mine"})),
            Some("loc_1"),
        )
        .unwrap();
        match req.body {
            ProxyBody::Json(v) => assert_eq!(v["locationId"], "loc_mine"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_body_injection_uses_param_override_not_query() {
        let req = build_request(
            &ep("/products/", LocationInjection::Body),
            &params(&[("locationId", "loc_param")]),
            ProxyBody::Empty,
            Some("loc_1"),
        )
        .unwrap();
        assert!(req.query.is_empty());
        match req.body {
            ProxyBody::Json(v) => assert_eq!(v, json!({"locationId": "loc_param"})),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_body_injection_rejects_raw_body() {
        let err = build_request(
            &ep("/products/", LocationInjection::Body),
            &Params::new(),
            ProxyBody::Raw {
                content_type: "text/plain".into(),
                bytes: Bytes::from_static(b"hi"),
            },
            Some("loc_1"),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidBody(_)));
    }

    #[test]
    fn test_missing_placeholder_and_location() {
        let err = build_request(
            &ep("/products/:id", LocationInjection::None),
            &Params::new(),
            ProxyBody::Empty,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::MissingParam(name) if name == "id"));

        let err = build_request(
            &ep("/products/", LocationInjection::Query),
            &Params::new(),
            ProxyBody::Empty,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::MissingLocation(_)));
    }

    #[test]
    fn test_extra_params_become_query_and_values_are_encoded() {
        let req = build_request(
            &ep("/contacts/:contactId", LocationInjection::None),
            &params(&[("contactId", "a b/c"), ("limit", "10"), ("locationId", "loc_x")]),
            ProxyBody::Empty,
            Some("loc_1"),
        )
        .unwrap();
        assert_eq!(req.path, "/contacts/a%20b%2Fc");
        assert_eq!(
            req.query,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("locationId".to_string(), "loc_x".to_string()),
            ]
        );
    }
}
