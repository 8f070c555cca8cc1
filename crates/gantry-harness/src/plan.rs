//! Plan files: the services of a run and its settings, in YAML.
//!
//! ```yaml
//! settings:
//!   ready_timeout_secs: 30
//! services:
//!   - name: policy
//!     image: ikolomiyets/demo-policy
//!     artifact: demo-policy
//!     local_image: demo-policy
//!     hostname: policies
//!     ports: ["8080/tcp"]
//!     env: { DEBUG: "true" }
//!     ready_marker: Started PolicyDemoApplication in
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use gantry_common::config::HarnessConfig;
use gantry_common::constants::DEFAULT_SCHEME;
use gantry_common::error::{GantryError, Result};
use gantry_common::types::ExposedPort;
use serde::{Deserialize, Serialize};

use crate::graph::startup_order;
use crate::service::ServiceSpec;

/// A parsed and validated plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// Run settings; omitted fields keep their defaults.
    #[serde(default)]
    pub settings: HarnessConfig,
    /// Services in declaration order.
    pub services: Vec<ServiceEntry>,
}

/// One service as written in a plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEntry {
    /// Unique service name.
    pub name: String,
    /// Image repository, without tag when `artifact` is set.
    pub image: String,
    /// Artifact whose pinned version becomes the image tag.
    #[serde(default)]
    pub artifact: Option<String>,
    /// Image used instead when running against local builds.
    #[serde(default)]
    pub local_image: Option<String>,
    /// Network alias.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Container ports to publish.
    #[serde(default)]
    pub ports: Vec<ExposedPort>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Log text that signals readiness.
    #[serde(default)]
    pub ready_marker: Option<String>,
    /// Services that must start first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Port the endpoint is resolved for; the first port when omitted.
    #[serde(default)]
    pub endpoint_port: Option<ExposedPort>,
    /// Endpoint URL scheme.
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

impl Plan {
    /// Reads and validates a plan file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it is malformed or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GantryError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let plan = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), services = plan.services.len(), "plan loaded");
        Ok(plan)
    }

    /// Parses and validates a plan from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the YAML is malformed or the plan
    /// fails validation.
    pub fn parse(content: &str) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(content).map_err(|e| GantryError::Config {
            message: format!("invalid plan: {e}"),
        })?;
        plan.validate()?;
        Ok(plan)
    }

    /// Checks the plan before any resource is acquired.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        check_not_empty(self)?;
        check_unique_names(self)?;
        for entry in &self.services {
            check_image(entry)?;
            check_ports(entry)?;
        }
        check_dependencies(self)?;
        let _order = self.startup_order()?;
        Ok(())
    }

    /// Service entries in the order they will start.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown dependencies or cycles.
    pub fn startup_order(&self) -> Result<Vec<&ServiceEntry>> {
        // Versions are not known yet; local resolution never fails.
        let specs = self.to_specs(&HashMap::new(), true)?;
        let order: Vec<String> = startup_order(&specs)?
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        Ok(order
            .iter()
            .filter_map(|name| self.services.iter().find(|e| &e.name == name))
            .collect())
    }

    /// Artifacts whose versions must be resolved, deduplicated, in
    /// declaration order. Empty in local mode.
    #[must_use]
    pub fn artifacts(&self) -> Vec<&str> {
        if self.settings.local_images {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        self.services
            .iter()
            .filter_map(|s| s.artifact.as_deref())
            .filter(|a| seen.insert(*a))
            .collect()
    }

    /// Builds the service specs, resolving each image against `versions`
    /// (artifact name to version).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a service names an artifact with
    /// no resolved version.
    pub fn service_specs(&self, versions: &HashMap<String, String>) -> Result<Vec<ServiceSpec>> {
        self.to_specs(versions, self.settings.local_images)
    }

    fn to_specs(&self, versions: &HashMap<String, String>, local: bool) -> Result<Vec<ServiceSpec>> {
        self.services
            .iter()
            .map(|entry| entry.to_spec(versions, local))
            .collect()
    }
}

impl ServiceEntry {
    /// Image reference to run and whether it must be pulled.
    ///
    /// Local mode uses `local_image` (or `image`) and never pulls.
    /// Otherwise the tag is the resolved version of `artifact`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `artifact` has no resolved version.
    pub fn resolve_image(
        &self,
        versions: &HashMap<String, String>,
        local: bool,
    ) -> Result<(String, bool)> {
        if local {
            let image = self.local_image.as_deref().unwrap_or(&self.image);
            return Ok((image.to_string(), false));
        }
        match &self.artifact {
            None => Ok((self.image.clone(), true)),
            Some(artifact) => {
                let version = versions.get(artifact).ok_or_else(|| GantryError::Config {
                    message: format!(
                        "no version resolved for artifact \"{artifact}\" (service {})",
                        self.name
                    ),
                })?;
                Ok((format!("{}:{version}", self.image), true))
            }
        }
    }

    fn to_spec(&self, versions: &HashMap<String, String>, local: bool) -> Result<ServiceSpec> {
        let (image, pull) = self.resolve_image(versions, local)?;

        let mut spec = ServiceSpec::new(&self.name, image)
            .auto_pull(pull)
            .scheme(&self.scheme);
        if let Some(hostname) = &self.hostname {
            spec = spec.hostname(hostname);
        }
        for port in &self.ports {
            spec = spec.port(*port);
        }
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        if let Some(marker) = &self.ready_marker {
            spec = spec.ready_marker(marker);
        }
        for dep in &self.depends_on {
            spec = spec.depends_on(dep);
        }
        if let Some(port) = self.endpoint_port {
            spec = spec.endpoint_port(port);
        }
        Ok(spec)
    }
}

fn check_not_empty(plan: &Plan) -> Result<()> {
    if plan.services.is_empty() {
        return Err(GantryError::Config {
            message: "plan declares no services".into(),
        });
    }
    Ok(())
}

fn check_unique_names(plan: &Plan) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in &plan.services {
        if entry.name.trim().is_empty() {
            return Err(GantryError::Config {
                message: "service name must not be empty".into(),
            });
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(GantryError::Config {
                message: format!("duplicate service name \"{}\"", entry.name),
            });
        }
    }
    Ok(())
}

fn check_image(entry: &ServiceEntry) -> Result<()> {
    if entry.image.trim().is_empty() {
        return Err(GantryError::Config {
            message: format!("service \"{}\" has an empty image", entry.name),
        });
    }
    Ok(())
}

fn check_ports(entry: &ServiceEntry) -> Result<()> {
    if entry.ports.is_empty() {
        return Err(GantryError::Config {
            message: format!("service \"{}\" exposes no ports", entry.name),
        });
    }
    if let Some(port) = entry.endpoint_port {
        if !entry.ports.contains(&port) {
            return Err(GantryError::Config {
                message: format!(
                    "service \"{}\": endpoint_port {port} is not in ports",
                    entry.name
                ),
            });
        }
    }
    Ok(())
}

fn check_dependencies(plan: &Plan) -> Result<()> {
    let names: HashSet<&str> = plan.services.iter().map(|s| s.name.as_str()).collect();
    for entry in &plan.services {
        for dep in &entry.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(GantryError::NotFound {
                    kind: "service",
                    id: format!("{dep} (required by {})", entry.name),
                });
            }
            if dep == &entry.name {
                return Err(GantryError::Config {
                    message: format!("service \"{}\" depends on itself", entry.name),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const DEMO: &str = r#"
settings:
  ready_timeout_secs: 45
services:
  - name: policy
    image: ikolomiyets/demo-policy
    artifact: demo-policy
    local_image: demo-policy
    hostname: policies
    ports: ["8080/tcp"]
    env: { DEBUG: "true" }
    ready_marker: Started PolicyDemoApplication in
  - name: customer
    image: ikolomiyets/demo-customers
    artifact: demo-customers
    local_image: demo-customer
    hostname: customers
    ports: ["3000/tcp"]
  - name: frontend
    image: ikolomiyets/demo-frontend
    artifact: demo-frontend
    ports: ["80/tcp"]
    depends_on: [policy, customer]
"#;

    fn versions() -> HashMap<String, String> {
        HashMap::from([
            ("demo-policy".to_string(), "1.4.2".to_string()),
            ("demo-customers".to_string(), "2.0.0".to_string()),
            ("demo-frontend".to_string(), "0.9.1".to_string()),
        ])
    }

    #[test]
    fn parses_demo_plan() {
        let plan = Plan::parse(DEMO).expect("valid plan");
        assert_eq!(plan.services.len(), 3);
        assert_eq!(plan.settings.ready_timeout_secs, 45);
        assert_eq!(plan.settings.network_prefix, "test-network");
        assert_eq!(plan.services[0].ports, vec![ExposedPort::tcp(8080)]);
        assert_eq!(plan.services[1].scheme, "http");
        assert_eq!(
            plan.artifacts(),
            vec!["demo-policy", "demo-customers", "demo-frontend"]
        );
    }

    #[test]
    fn remote_images_are_tagged_with_resolved_versions() {
        let plan = Plan::parse(DEMO).expect("valid plan");
        let specs = plan.service_specs(&versions()).expect("specs");
        assert_eq!(specs[0].image(), "ikolomiyets/demo-policy:1.4.2");
        assert!(specs[0].pulls_image());
        assert_eq!(specs[0].marker(), "Started PolicyDemoApplication in");
        assert_eq!(specs[1].marker(), "");
    }

    #[test]
    fn local_mode_uses_local_images_without_pulling() {
        let mut plan = Plan::parse(DEMO).expect("valid plan");
        plan.settings.local_images = true;
        assert!(plan.artifacts().is_empty());

        let specs = plan.service_specs(&HashMap::new()).expect("specs");
        assert_eq!(specs[1].image(), "demo-customer");
        assert_eq!(specs[2].image(), "ikolomiyets/demo-frontend");
        assert!(specs.iter().all(|s| !s.pulls_image()));
    }

    #[test]
    fn missing_version_is_a_config_error() {
        let plan = Plan::parse(DEMO).expect("valid plan");
        let partial = HashMap::from([("demo-policy".to_string(), "1.4.2".to_string())]);
        let msg = plan.service_specs(&partial).unwrap_err().to_string();
        assert!(msg.contains("demo-customers"), "got: {msg}");
    }

    #[test]
    fn startup_order_follows_depends_on() {
        let plan = Plan::parse(DEMO).expect("valid plan");
        let order: Vec<&str> = plan
            .startup_order()
            .expect("acyclic")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(order, vec!["policy", "customer", "frontend"]);
    }

    #[test]
    fn rejects_empty_service_list() {
        let msg = Plan::parse("services: []\n").unwrap_err().to_string();
        assert!(msg.contains("no services"), "got: {msg}");
    }

    #[test]
    fn rejects_duplicate_names() {
        let yaml = r#"
services:
  - { name: a, image: x, ports: ["80"] }
  - { name: a, image: y, ports: ["80"] }
"#;
        let msg = Plan::parse(yaml).unwrap_err().to_string();
        assert!(msg.contains("duplicate"), "got: {msg}");
    }

    #[test]
    fn rejects_service_without_ports() {
        let msg = Plan::parse("services:\n  - { name: a, image: x }\n")
            .unwrap_err()
            .to_string();
        assert!(msg.contains("no ports"), "got: {msg}");
    }

    #[test]
    fn rejects_endpoint_port_not_exposed() {
        let yaml = r#"
services:
  - { name: a, image: x, ports: ["80"], endpoint_port: "443" }
"#;
        let msg = Plan::parse(yaml).unwrap_err().to_string();
        assert!(msg.contains("endpoint_port"), "got: {msg}");
    }

    #[test]
    fn rejects_unknown_dependency_and_cycles() {
        let unknown = r#"
services:
  - { name: a, image: x, ports: ["80"], depends_on: [ghost] }
"#;
        assert!(Plan::parse(unknown).is_err());

        let cycle = r#"
services:
  - { name: a, image: x, ports: ["80"], depends_on: [b] }
  - { name: b, image: y, ports: ["80"], depends_on: [a] }
"#;
        let msg = Plan::parse(cycle).unwrap_err().to_string();
        assert!(msg.contains("cyclic"), "got: {msg}");
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "services:\n  - { name: a, image: x, ports: [\"80\"], healthcheck: true }\n";
        assert!(Plan::parse(yaml).is_err());
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(DEMO.as_bytes()).expect("write plan");
        let plan = Plan::load(file.path()).expect("load");
        assert_eq!(plan.services[2].name, "frontend");

        let err = Plan::load(Path::new("/nonexistent/plan.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/plan.yaml"));
    }
}
