//! Endpoint registry: logical operation name to upstream route.
//!
//! New upstream operations are added as table entries (built-in or from a
//! YAML file at startup), never as new code paths. The registry is frozen
//! once constructed and shared behind an `Arc`.

use std::collections::HashMap;

use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;

use crate::models::endpoint::{EndpointDescriptor, LocationInjection, LOCATION_PARAM};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid endpoint file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("endpoint '{0}' injects location into the path but has no :locationId placeholder")]
    MissingLocationPlaceholder(String),

    #[error("endpoint '{0}' has an empty name or a path not starting with '/'")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct EndpointFile {
    endpoints: Vec<EndpointDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<String, EndpointDescriptor>,
}

impl EndpointRegistry {
    /// Registry preloaded with the CRM routes the gateway ships with.
    pub fn builtin() -> Self {
        use LocationInjection::{Body, None as NoLocation, Path, Query};

        let e = EndpointDescriptor::new;
        let table = vec![
            // Products
            e("listProducts", Method::GET, "/products/", Query, Some("products.readonly")),
            e("createProduct", Method::POST, "/products/", Body, Some("products.write")),
            e("getProduct", Method::GET, "/products/:productId", Query, Some("products.readonly")),
            e("updateProduct", Method::PUT, "/products/:productId", Body, Some("products.write")),
            e("deleteProduct", Method::DELETE, "/products/:productId", Query, Some("products.write")),
            e("listLocationProducts", Method::GET, "/locations/:locationId/products", Path, Some("products.readonly")),
            // Product prices
            e("listPrices", Method::GET, "/products/:productId/price", Query, Some("products/prices.readonly")),
            e("createPrice", Method::POST, "/products/:productId/price", Body, Some("products/prices.write")),
            e("getPrice", Method::GET, "/products/:productId/price/:priceId", Query, Some("products/prices.readonly")),
            e("updatePrice", Method::PUT, "/products/:productId/price/:priceId", Body, Some("products/prices.write")),
            e("deletePrice", Method::DELETE, "/products/:productId/price/:priceId", Query, Some("products/prices.write")),
            // Contacts
            e("listContacts", Method::GET, "/contacts/", Query, Some("contacts.readonly")),
            e("createContact", Method::POST, "/contacts/", Body, Some("contacts.write")),
            e("getContact", Method::GET, "/contacts/:contactId", NoLocation, Some("contacts.readonly")),
            e("updateContact", Method::PUT, "/contacts/:contactId", NoLocation, Some("contacts.write")),
            e("deleteContact", Method::DELETE, "/contacts/:contactId", NoLocation, Some("contacts.write")),
            // Locations
            e("getLocation", Method::GET, "/locations/:locationId", Path, Some("locations.readonly")),
            // Opportunities
            e("searchOpportunities", Method::GET, "/opportunities/search", Query, Some("opportunities.readonly")),
            e("createOpportunity", Method::POST, "/opportunities/", Body, Some("opportunities.write")),
            e("getOpportunity", Method::GET, "/opportunities/:opportunityId", NoLocation, Some("opportunities.readonly")),
            e("updateOpportunity", Method::PUT, "/opportunities/:opportunityId", NoLocation, Some("opportunities.write")),
            e("deleteOpportunity", Method::DELETE, "/opportunities/:opportunityId", NoLocation, Some("opportunities.write")),
            // Workflows
            e("listWorkflows", Method::GET, "/workflows/", Query, Some("workflows.readonly")),
            e("triggerWorkflow", Method::POST, "/contacts/:contactId/workflow/:workflowId", NoLocation, Some("contacts.write")),
            // Forms
            e("listForms", Method::GET, "/forms/", Query, Some("forms.readonly")),
            e("listFormSubmissions", Method::GET, "/forms/submissions", Query, Some("forms.readonly")),
            // Media library
            e("listMedia", Method::GET, "/medias/files", NoLocation, Some("medias.readonly")),
            e("uploadMedia", Method::POST, "/medias/upload-file", NoLocation, Some("medias.write")),
            e("deleteMedia", Method::DELETE, "/medias/:mediaId", NoLocation, Some("medias.write")),
        ];

        Self::from_descriptors(table)
    }

    /// Later descriptors replace earlier ones with the same name.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = EndpointDescriptor>) -> Self {
        let endpoints = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { endpoints }
    }

    /// Append (or override) descriptors from a YAML document of the form
    /// `endpoints: [{name, method, path_template, location_injection, required_scope}]`.
    pub fn extend_from_yaml(mut self, yaml: &str) -> Result<Self, RegistryError> {
        let file: EndpointFile = serde_yaml::from_str(yaml)?;
        for descriptor in file.endpoints {
            validate(&descriptor)?;
            if self.endpoints.contains_key(&descriptor.name) {
                tracing::info!(endpoint = %descriptor.name, "overriding built-in endpoint");
            }
            self.endpoints.insert(descriptor.name.clone(), descriptor);
        }
        Ok(self)
    }

    pub fn resolve(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.get(name)
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<&EndpointDescriptor> {
        let mut all: Vec<_> = self.endpoints.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

fn validate(descriptor: &EndpointDescriptor) -> Result<(), RegistryError> {
    if descriptor.name.trim().is_empty() || !descriptor.path_template.starts_with('/') {
        return Err(RegistryError::Malformed(descriptor.name.clone()));
    }
    if descriptor.location_injection == LocationInjection::Path
        && !descriptor.placeholders().any(|p| p == LOCATION_PARAM)
    {
        return Err(RegistryError::MissingLocationPlaceholder(descriptor.name.clone()));
    }
    Ok(())
}
