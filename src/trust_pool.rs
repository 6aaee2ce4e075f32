//! CA trust pool resolution
//!
//! The connector can be pointed at a custom set of CA certificates held in a
//! ConfigMap or a Secret. Exactly one backing store may be named; once
//! resolved, [`TrustPoolSource`] makes the "both" case unrepresentable.

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, SecretVolumeSource, Volume, VolumeMount,
};

use crate::{Error, Result};

/// Default key of the CA bundle inside the ConfigMap or Secret
pub const DEFAULT_TRUST_POOL_KEY: &str = "ca-certificates.crt";

/// Default directory the CA bundle is mounted at
pub const DEFAULT_TRUST_POOL_MOUNT_PATH: &str = "/etc/ssl/certs";

/// Name of the pod volume carrying the CA bundle
pub const TRUST_POOL_VOLUME_NAME: &str = "ca-pool";

/// Store holding the CA bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustPoolSource {
    /// ConfigMap in the connector's namespace
    ConfigMap {
        /// ConfigMap name
        name: String,
    },
    /// Secret in the connector's namespace
    Secret {
        /// Secret name
        name: String,
    },
}

/// Pod volume and container mount carrying a trust pool
#[derive(Clone, Debug, PartialEq)]
pub struct TrustVolume {
    /// Volume bound to the backing store
    pub volume: Volume,
    /// Mount projecting the bundle key into the container
    pub mount: VolumeMount,
}

/// A resolved CA trust pool reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustPool {
    /// Backing store
    pub source: TrustPoolSource,
    /// Key of the bundle inside the store
    pub key: String,
    /// Path the bundle is mounted at in the connector container
    pub mount_path: String,
}

impl TrustPool {
    /// Trust pool backed by a ConfigMap, using the default key and mount path
    pub fn config_map(name: impl Into<String>) -> Self {
        Self::with_source(TrustPoolSource::ConfigMap { name: name.into() })
    }

    /// Trust pool backed by a Secret, using the default key and mount path
    pub fn secret(name: impl Into<String>) -> Self {
        Self::with_source(TrustPoolSource::Secret { name: name.into() })
    }

    fn with_source(source: TrustPoolSource) -> Self {
        Self {
            source,
            key: DEFAULT_TRUST_POOL_KEY.to_string(),
            mount_path: DEFAULT_TRUST_POOL_MOUNT_PATH.to_string(),
        }
    }

    /// Override the key of the bundle inside the store
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Override the mount path
    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = mount_path.into();
        self
    }

    /// Volume and mount pair to wire into the connector pod
    pub fn trust_volume(&self) -> TrustVolume {
        TrustVolume {
            volume: self.volume(),
            mount: self.volume_mount(),
        }
    }

    /// Pod volume bound to the backing store
    pub fn volume(&self) -> Volume {
        let mut volume = Volume {
            name: TRUST_POOL_VOLUME_NAME.to_string(),
            ..Default::default()
        };
        match &self.source {
            TrustPoolSource::ConfigMap { name } => {
                volume.config_map = Some(ConfigMapVolumeSource {
                    name: name.clone(),
                    ..Default::default()
                });
            }
            TrustPoolSource::Secret { name } => {
                volume.secret = Some(SecretVolumeSource {
                    secret_name: Some(name.clone()),
                    ..Default::default()
                });
            }
        }
        volume
    }

    /// Container mount projecting the bundle key at the mount path
    pub fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: TRUST_POOL_VOLUME_NAME.to_string(),
            mount_path: self.mount_path.clone(),
            sub_path: Some(self.key.clone()),
            ..Default::default()
        }
    }
}

/// Resolve trust pool options into a single reference
///
/// Returns `Ok(None)` when neither a ConfigMap nor a Secret is named. Empty
/// strings count as unset so that flags bound to empty environment variables
/// behave the same as missing ones.
pub fn resolve(
    config_map: Option<&str>,
    secret: Option<&str>,
    key: Option<&str>,
    mount_path: Option<&str>,
) -> Result<Option<TrustPool>> {
    let pool = match (non_empty(config_map), non_empty(secret)) {
        (None, None) => return Ok(None),
        (Some(_), Some(_)) => {
            return Err(Error::configuration(
                "only one of --capool-config-map or --capool-secret may be specified",
            ))
        }
        (Some(name), None) => TrustPool::config_map(name),
        (None, Some(name)) => TrustPool::secret(name),
    };

    let pool = match non_empty(key) {
        Some(key) => pool.with_key(key),
        None => pool,
    };
    let pool = match non_empty(mount_path) {
        Some(path) => pool.with_mount_path(path),
        None => pool,
    };

    Ok(Some(pool))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_store_named_means_no_trust_pool() {
        assert_eq!(resolve(None, None, None, None).unwrap(), None);
        // key and path alone do not request a trust pool
        assert_eq!(
            resolve(None, None, Some("bundle.pem"), Some("/certs")).unwrap(),
            None
        );
        assert_eq!(resolve(Some(""), Some(""), None, None).unwrap(), None);
    }

    #[test]
    fn config_map_only_uses_defaults() {
        let pool = resolve(Some("ca-bundle"), None, None, None)
            .unwrap()
            .expect("trust pool");
        assert_eq!(
            pool.source,
            TrustPoolSource::ConfigMap {
                name: "ca-bundle".to_string()
            }
        );
        assert_eq!(pool.key, "ca-certificates.crt");
        assert_eq!(pool.mount_path, "/etc/ssl/certs");
    }

    #[test]
    fn secret_only_honours_overrides() {
        let pool = resolve(None, Some("corp-ca"), Some("root.pem"), Some("/opt/ca/root.pem"))
            .unwrap()
            .expect("trust pool");
        assert_eq!(
            pool.source,
            TrustPoolSource::Secret {
                name: "corp-ca".to_string()
            }
        );
        assert_eq!(pool.key, "root.pem");
        assert_eq!(pool.mount_path, "/opt/ca/root.pem");
    }

    #[test]
    fn both_stores_is_a_configuration_error() {
        let cases = [
            (None, None),
            (Some("k"), None),
            (None, Some("/p")),
            (Some("k"), Some("/p")),
        ];
        for (key, path) in cases {
            let err = resolve(Some("cm"), Some("sec"), key, path).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }));
            assert!(!err.is_retryable());
            assert!(err.to_string().contains("only one of"));
        }
    }

    #[test]
    fn config_map_volume_wiring() {
        let pool = TrustPool::config_map("ca-bundle");
        let volume = pool.volume();
        assert_eq!(volume.name, "ca-pool");
        assert_eq!(volume.config_map.as_ref().unwrap().name, "ca-bundle");
        assert!(volume.secret.is_none());

        let mount = pool.volume_mount();
        assert_eq!(mount.name, "ca-pool");
        assert_eq!(mount.mount_path, "/etc/ssl/certs");
        assert_eq!(mount.sub_path.as_deref(), Some("ca-certificates.crt"));
    }

    #[test]
    fn secret_volume_wiring() {
        let pool = TrustPool::secret("corp-ca").with_key("tls.crt");
        let volume = pool.volume();
        assert_eq!(
            volume.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("corp-ca")
        );
        assert!(volume.config_map.is_none());
        assert_eq!(pool.volume_mount().sub_path.as_deref(), Some("tls.crt"));
    }

    #[test]
    fn trust_volume_pairs_volume_and_mount() {
        let pool = TrustPool::config_map("ca-bundle").with_mount_path("/certs");
        let TrustVolume { volume, mount } = pool.trust_volume();
        assert_eq!(volume, pool.volume());
        assert_eq!(mount.name, volume.name);
        assert_eq!(mount.mount_path, "/certs");
    }
}
