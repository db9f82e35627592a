//! LoginTask (§4.4): resolve a registry from an image reference and
//! authenticate against it before a pull.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ship::Ship;

/// One configured registry (§6 `registries.<name>`).
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    /// Registry URL, e.g. `https://registry.example.com` or `http://localhost:5000`.
    pub registry: String,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Contact email, if required by the registry.
    pub email: Option<String>,
}

/// Authenticate against the registry implied by an image's repository
/// prefix, if one is configured.
pub struct LoginTask<'a> {
    ship: &'a Ship,
    registries: &'a HashMap<String, RegistryCredentials>,
}

impl<'a> LoginTask<'a> {
    /// Build a LoginTask against `ship`, resolving registries from `registries`.
    #[must_use]
    pub fn new(ship: &'a Ship, registries: &'a HashMap<String, RegistryCredentials>) -> Self {
        Self { ship, registries }
    }

    /// Extract the registry host from `image` (text before the first
    /// `/`; images with no `/` have no registry and the task is a
    /// no-op), resolve it against `registries` (exact name match, then
    /// a scan matching the FQDN or bare host of each registry's URL),
    /// and log in if a match is found. Any failure is fatal.
    pub async fn run(&self, image: &str) -> Result<()> {
        let Some(creds) = resolve_registry(self.registries, image) else {
            return Ok(());
        };

        self.ship
            .login(
                &creds.registry,
                &creds.username,
                &creds.password,
                creds.email.as_deref(),
            )
            .await
            .map_err(|e| Error::orchestration(format!("registry login failed: {e}")))
    }
}

/// Resolve the registry configured for `image`'s repository prefix
/// (exact name match, then the §9 URL-host fallback), or `None` if the
/// image has no registry prefix or no configured registry matches.
pub(crate) fn resolve_registry<'a>(
    registries: &'a HashMap<String, RegistryCredentials>,
    image: &str,
) -> Option<&'a RegistryCredentials> {
    let prefix = registry_prefix(image)?;
    registries
        .get(prefix)
        .or_else(|| registries.values().find(|creds| matches_registry_url(&creds.registry, prefix)))
}

/// The registry prefix of an image reference: text before the first
/// `/`, or `None` if there is no `/` (implying the default registry).
fn registry_prefix(image: &str) -> Option<&str> {
    image.split_once('/').map(|(prefix, _)| prefix)
}

/// Whether `registry_url`'s host (with or without its port) equals
/// `prefix`.
fn matches_registry_url(registry_url: &str, prefix: &str) -> bool {
    let Ok(url) = url::Url::parse(registry_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let host_with_port = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    host == prefix || host_with_port == prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_prefix_extraction() {
        assert_eq!(
            registry_prefix("registry.example.com/web"),
            Some("registry.example.com")
        );
        assert_eq!(registry_prefix("web"), None);
        assert_eq!(registry_prefix("library/web"), Some("library"));
    }

    #[test]
    fn test_matches_registry_url_bare_host() {
        assert!(matches_registry_url(
            "https://registry.example.com",
            "registry.example.com"
        ));
    }

    #[test]
    fn test_matches_registry_url_with_port() {
        assert!(matches_registry_url(
            "http://localhost:5000",
            "localhost:5000"
        ));
        assert!(matches_registry_url("http://localhost:5000", "localhost"));
    }
}
