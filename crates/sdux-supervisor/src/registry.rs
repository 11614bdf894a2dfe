//! Launcher registry: application id to launch spec.

use std::collections::BTreeMap;
use std::sync::Arc;

use sdux_core::{ApplicationConfig, Error, LaunchSpec, Result, ShellConfig};
use tracing::{debug, info};

/// Resolves application identifiers to immutable launch specs.
///
/// Ids are matched case-insensitively. Definitions only change through
/// [`LauncherRegistry::reload`]; launches already in flight keep the
/// `Arc<LaunchSpec>` they resolved.
#[derive(Debug, Clone, Default)]
pub struct LauncherRegistry {
    specs: BTreeMap<String, Arc<LaunchSpec>>,
}

impl LauncherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `applications` section of the config.
    pub fn from_config(config: &ShellConfig) -> Self {
        let mut registry = Self::new();
        registry.load(&config.applications);
        registry
    }

    /// Register (or replace) one definition.
    pub fn register(&mut self, app_id: &str, spec: LaunchSpec) {
        self.specs.insert(normalize(app_id), Arc::new(spec));
    }

    /// Look up the spec for `app_id`.
    pub fn resolve(&self, app_id: &str) -> Result<Arc<LaunchSpec>> {
        self.specs
            .get(&normalize(app_id))
            .cloned()
            .ok_or_else(|| Error::UnknownApplication(app_id.to_string()))
    }

    /// Whether `app_id` is registered.
    pub fn contains(&self, app_id: &str) -> bool {
        self.specs.contains_key(&normalize(app_id))
    }

    /// Replace every definition. Returns the number of definitions loaded.
    pub fn reload(&mut self, applications: &BTreeMap<String, ApplicationConfig>) -> usize {
        let before = self.specs.len();
        self.specs.clear();
        self.load(applications);
        info!(
            "Launcher registry reloaded ({} -> {} applications)",
            before,
            self.specs.len()
        );
        self.specs.len()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn load(&mut self, applications: &BTreeMap<String, ApplicationConfig>) {
        for (id, app) in applications {
            debug!("Registering application '{}' ({})", id, app.command);
            self.register(id, app.to_spec());
        }
    }
}

/// Canonical form of an application id.
pub fn normalize(app_id: &str) -> String {
    app_id.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdux_core::RestartPolicy;

    fn config() -> ShellConfig {
        ShellConfig::from_yaml(
            r#"
applications:
  Term:
    command: /usr/bin/xterm
    expected_window_class: xterm
  files:
    command: pcmanfm
    restart: on-crash
    max_restarts: 2
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_known() {
        let registry = LauncherRegistry::from_config(&config());
        let spec = registry.resolve("term").unwrap();
        assert_eq!(spec.command, "/usr/bin/xterm");
        assert_eq!(spec.expected_window_class.as_deref(), Some("xterm"));
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let registry = LauncherRegistry::from_config(&config());
        assert!(registry.resolve(" FILES ").is_ok());
        assert!(registry.contains("TERM"));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = LauncherRegistry::from_config(&config());
        let err = registry.resolve("browser").unwrap_err();
        assert!(matches!(err, Error::UnknownApplication(ref id) if id == "browser"));
    }

    #[test]
    fn test_resolve_is_pure() {
        let registry = LauncherRegistry::from_config(&config());
        let first = registry.resolve("files").unwrap();
        let second = registry.resolve("files").unwrap();
        assert_eq!(*first, *second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_reload_keeps_in_flight_specs() {
        let mut registry = LauncherRegistry::from_config(&config());
        let held = registry.resolve("files").unwrap();

        let mut apps = BTreeMap::new();
        apps.insert(
            "files".to_string(),
            ShellConfig::from_yaml("applications:\n  files:\n    command: thunar\n")
                .unwrap()
                .applications["files"]
                .clone(),
        );
        assert_eq!(registry.reload(&apps), 1);

        assert_eq!(held.command, "pcmanfm");
        assert_eq!(held.restart, RestartPolicy::OnCrash);
        assert_eq!(registry.resolve("files").unwrap().command, "thunar");
        assert!(registry.resolve("term").is_err());
    }

    #[test]
    fn test_ids_sorted() {
        let registry = LauncherRegistry::from_config(&config());
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["files", "term"]);
        assert_eq!(registry.len(), 2);
    }
}
