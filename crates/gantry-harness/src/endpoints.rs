//! Resolved service endpoints handed to the test phase.

use std::collections::BTreeMap;

use gantry_common::constants::{ENDPOINT_ENV_PREFIX, ENDPOINT_ENV_SUFFIX};

/// Base URLs of the started services, keyed by service name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    urls: BTreeMap<String, String>,
}

impl Endpoints {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the URL of `service`.
    pub fn insert(&mut self, service: impl Into<String>, url: impl Into<String>) {
        let _ = self.urls.insert(service.into(), url.into());
    }

    /// URL of `service`, if it was resolved.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<&str> {
        self.urls.get(service).map(String::as_str)
    }

    /// Number of resolved services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Iterates `(service, url)` pairs sorted by service name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.urls.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Environment variables exposing each endpoint to a child process:
    /// `policy-svc` becomes `GANTRY_POLICY_SVC_URL`.
    #[must_use]
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.urls
            .iter()
            .map(|(service, url)| (env_var_name(service), url.clone()))
            .collect()
    }
}

/// Environment variable name that carries `service`'s endpoint.
#[must_use]
pub fn env_var_name(service: &str) -> String {
    let upper: String = service
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENDPOINT_ENV_PREFIX}{upper}{ENDPOINT_ENV_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_is_shell_safe() {
        assert_eq!(env_var_name("policy"), "GANTRY_POLICY_URL");
        assert_eq!(env_var_name("demo-customer"), "GANTRY_DEMO_CUSTOMER_URL");
        assert_eq!(env_var_name("svc.v2"), "GANTRY_SVC_V2_URL");
    }

    #[test]
    fn env_vars_follow_service_names() {
        let mut endpoints = Endpoints::new();
        endpoints.insert("policy", "http://localhost:49154");
        endpoints.insert("customer", "http://localhost:49155");

        assert_eq!(endpoints.get("policy"), Some("http://localhost:49154"));
        assert_eq!(endpoints.get("gateway"), None);
        assert_eq!(
            endpoints.env_vars(),
            vec![
                (
                    "GANTRY_CUSTOMER_URL".to_string(),
                    "http://localhost:49155".to_string()
                ),
                (
                    "GANTRY_POLICY_URL".to_string(),
                    "http://localhost:49154".to_string()
                ),
            ]
        );
    }
}
