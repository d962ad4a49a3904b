//! Service identity.

use std::env;

/// Environment variable holding the service name.
pub const SERVICE_ENV_VAR: &str = "DD_SERVICE";

/// Environment variable holding the deployment environment.
pub const ENV_ENV_VAR: &str = "DD_ENV";

/// Environment variable holding the service version.
pub const VERSION_ENV_VAR: &str = "DD_VERSION";

/// Unified service tags used to label spans and logs.
///
/// These values are never interpreted: they are passed through verbatim from the process environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceIdentity {
    service: String,
    env: String,
    version: String,
}

impl ServiceIdentity {
    /// Creates a new `ServiceIdentity` from explicit values.
    pub fn new<S, E, V>(service: S, env: E, version: V) -> Self
    where
        S: Into<String>,
        E: Into<String>,
        V: Into<String>,
    {
        Self {
            service: service.into(),
            env: env.into(),
            version: version.into(),
        }
    }

    /// Reads the service identity from the process environment.
    ///
    /// `DD_SERVICE`, `DD_ENV`, and `DD_VERSION` are consulted. Missing or empty values fall back to `default_service`,
    /// `none`, and `default_version`, respectively.
    pub fn from_env(default_service: &str, default_version: &str) -> Self {
        Self::from_lookup(|key| env::var(key).ok(), default_service, default_version)
    }

    fn from_lookup<F>(lookup: F, default_service: &str, default_version: &str) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            service: get(SERVICE_ENV_VAR, default_service),
            env: get(ENV_ENV_VAR, "none"),
            version: get(VERSION_ENV_VAR, default_version),
        }
    }

    /// Returns the service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the deployment environment.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Returns the service version.
    pub fn version(&self) -> &str {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn lookup_with_values() {
        let vars = HashMap::from([
            (SERVICE_ENV_VAR, "checkout"),
            (ENV_ENV_VAR, "staging"),
            (VERSION_ENV_VAR, "1.10"),
        ]);
        let identity = ServiceIdentity::from_lookup(|k| vars.get(k).map(|v| v.to_string()), "service-a", "0.1.0");

        assert_eq!(identity, ServiceIdentity::new("checkout", "staging", "1.10"));
    }

    #[test]
    fn lookup_defaults() {
        let vars = HashMap::from([(ENV_ENV_VAR, "  ")]);
        let identity = ServiceIdentity::from_lookup(|k| vars.get(k).map(|v| v.to_string()), "service-b", "0.2.0");

        assert_eq!(identity.service(), "service-b");
        assert_eq!(identity.env(), "none");
        assert_eq!(identity.version(), "0.2.0");
    }
}
