use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::paths::to_host_path;

/// Options for the containerized worker execution path. Every field has a
/// default suitable for local Docker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_image")]
    pub worker_image: String,

    /// Where the shared volume is mounted inside the container.
    #[serde(default = "default_data_volume_path")]
    pub data_volume_path: String,

    /// Where that volume lives on the host. Unset when the engine itself
    /// runs in the container and paths need no translation.
    #[serde(default)]
    pub host_data_path: Option<String>,

    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,

    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_docker_socket_path")]
    pub docker_socket_path: String,

    #[serde(default = "default_network_name")]
    pub network_name: String,
}

fn default_worker_image() -> String {
    "homespun-worker:latest".to_string()
}

fn default_data_volume_path() -> String {
    "/data".to_string()
}

fn default_memory_limit_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_cpu_limit() -> f64 {
    2.0
}

fn default_request_timeout_secs() -> u64 {
    30 * 60
}

fn default_docker_socket_path() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_network_name() -> String {
    "homespun".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_image: default_worker_image(),
            data_volume_path: default_data_volume_path(),
            host_data_path: None,
            memory_limit_bytes: default_memory_limit_bytes(),
            cpu_limit: default_cpu_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            docker_socket_path: default_docker_socket_path(),
            network_name: default_network_name(),
        }
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Translate a container path with this config's volume mapping.
    pub fn to_host_path(&self, path: &str) -> String {
        to_host_path(path, &self.data_volume_path, self.host_data_path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_docker() {
        let config = WorkerConfig::default();
        assert_eq!(config.data_volume_path, "/data");
        assert_eq!(config.docker_socket_path, "/var/run/docker.sock");
        assert_eq!(config.request_timeout(), Duration::from_secs(1800));
        assert!(config.host_data_path.is_none());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: WorkerConfig =
            serde_yaml::from_str("worker_image: ghcr.io/acme/worker:2\nhost_data_path: /srv/data\n")
                .unwrap();
        assert_eq!(config.worker_image, "ghcr.io/acme/worker:2");
        assert_eq!(config.host_data_path.as_deref(), Some("/srv/data"));
        assert_eq!(config.cpu_limit, 2.0);
    }

    #[test]
    fn config_level_path_translation() {
        let config = WorkerConfig {
            host_data_path: Some("/srv/data".into()),
            ..WorkerConfig::default()
        };
        assert_eq!(config.to_host_path("/data/p/x"), "/srv/data/p/x");
        assert_eq!(config.to_host_path("/etc/hosts"), "/etc/hosts");
    }
}
