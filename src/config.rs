//! Connector configuration
//!
//! The deployment settings arrive as plain strings (typically environment
//! variables read by the binary). [`ConnectorConfig::resolve`] validates them
//! into a [`ResolvedConnectorConfig`] the workload builder can use directly.

use crate::{Error, Result};

/// Environment variable holding the cloudflared image reference
pub const IMAGE_ENV: &str = "CLOUDFLARED_IMAGE";

/// Environment variable holding the image pull policy
pub const IMAGE_PULL_POLICY_ENV: &str = "CLOUDFLARED_IMAGE_PULL_POLICY";

/// Environment variable holding the desired connector replica count
pub const REPLICA_COUNT_ENV: &str = "CLOUDFLARED_REPLICA_COUNT";

/// Pull policies accepted by the kubelet
const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

/// Unvalidated connector settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Container image reference for cloudflared
    pub image: Option<String>,
    /// Image pull policy (Always, IfNotPresent, Never)
    pub image_pull_policy: Option<String>,
    /// Desired replica count, as configured
    pub replica_count: Option<String>,
}

/// Validated connector settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConnectorConfig {
    /// Container image reference
    pub image: String,
    /// Pull policy, or `None` to let the cluster default apply
    pub image_pull_policy: Option<String>,
    /// Desired replica count
    pub replicas: i32,
}

impl ConnectorConfig {
    /// Validate every setting
    ///
    /// A missing replica count is rejected rather than defaulted: the
    /// connector count is an explicit operator decision.
    pub fn resolve(&self) -> Result<ResolvedConnectorConfig> {
        let replicas = self.replica_count()?;

        let image = self
            .image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
            .ok_or_else(|| {
                Error::configuration_for_field(IMAGE_ENV, "cloudflared image is not set")
            })?
            .to_string();

        let image_pull_policy = match self.image_pull_policy.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(policy) if PULL_POLICIES.contains(&policy) => Some(policy.to_string()),
            Some(policy) => {
                return Err(Error::configuration_for_field(
                    IMAGE_PULL_POLICY_ENV,
                    format!(
                        "image pull policy {policy:?} must be one of {}",
                        PULL_POLICIES.join(", ")
                    ),
                ))
            }
        };

        Ok(ResolvedConnectorConfig {
            image,
            image_pull_policy,
            replicas,
        })
    }

    /// Parse the configured replica count as a non-negative integer
    ///
    /// The value is taken verbatim; surrounding whitespace is malformed.
    pub fn replica_count(&self) -> Result<i32> {
        let raw = self
            .replica_count
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| {
                Error::configuration_for_field(REPLICA_COUNT_ENV, "replica count is not set")
            })?;

        raw.parse::<u32>()
            .ok()
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| {
                Error::configuration_for_field(
                    REPLICA_COUNT_ENV,
                    format!("invalid replica count {raw:?}: expected a non-negative integer"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(replicas: Option<&str>) -> ConnectorConfig {
        ConnectorConfig {
            image: Some("cloudflare/cloudflared:2024.8.2".to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            replica_count: replicas.map(str::to_string),
        }
    }

    #[test]
    fn parses_replica_count() {
        assert_eq!(config(Some("3")).replica_count().unwrap(), 3);
        assert_eq!(config(Some("0")).replica_count().unwrap(), 0);
        assert_eq!(config(Some("+2")).replica_count().unwrap(), 2);
    }

    #[test]
    fn rejects_malformed_replica_count() {
        for raw in ["abc", "-1", "1.5", "99999999999", " 2 ", "2\n"] {
            let err = config(Some(raw)).replica_count().unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{raw}");
            assert_eq!(err.field(), Some(REPLICA_COUNT_ENV));
        }
    }

    #[test]
    fn missing_replica_count_is_an_error() {
        let err = config(None).resolve().unwrap_err();
        assert_eq!(err.field(), Some(REPLICA_COUNT_ENV));
        assert!(err.to_string().contains("not set"));

        let err = config(Some("")).resolve().unwrap_err();
        assert_eq!(err.field(), Some(REPLICA_COUNT_ENV));
    }

    #[test]
    fn resolves_full_config() {
        let resolved = config(Some("2")).resolve().unwrap();
        assert_eq!(resolved.image, "cloudflare/cloudflared:2024.8.2");
        assert_eq!(resolved.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(resolved.replicas, 2);
    }

    #[test]
    fn image_is_required() {
        let mut cfg = config(Some("1"));
        cfg.image = Some("  ".to_string());
        let err = cfg.resolve().unwrap_err();
        assert_eq!(err.field(), Some(IMAGE_ENV));
    }

    #[test]
    fn pull_policy_is_optional_but_validated() {
        let mut cfg = config(Some("1"));
        cfg.image_pull_policy = None;
        assert_eq!(cfg.resolve().unwrap().image_pull_policy, None);

        cfg.image_pull_policy = Some("Sometimes".to_string());
        let err = cfg.resolve().unwrap_err();
        assert_eq!(err.field(), Some(IMAGE_PULL_POLICY_ENV));
        assert!(err.to_string().contains("Sometimes"));
    }
}
