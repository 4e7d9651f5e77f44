//! Process settings from the environment
//!
//! | variable | default |
//! |---|---|
//! | `FUZZDECK_CONFIG` | none (built-in orchestrator defaults) |
//! | `FUZZDECK_HOST` | `0.0.0.0` |
//! | `FUZZDECK_PORT` | `3000` |
//! | `FUZZDECK_DB` | none (in-memory record store) |
//! | `FUZZDECK_DATA_DIR` | overrides `data_dir` from the config file |
//! | `LOG_FORMAT` | `json` switches log output to JSON |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use fuzzdeck_orchestration::OrchestratorConfig;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: IpAddr,
    pub port: u16,
    pub config_path: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub json_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            config_path: None,
            database: None,
            data_dir: None,
            json_logs: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let host = match get("FUZZDECK_HOST") {
            Some(host) => host
                .parse()
                .with_context(|| format!("FUZZDECK_HOST is not an IP address: {}", host))?,
            None => defaults.host,
        };
        let port = match get("FUZZDECK_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("FUZZDECK_PORT is not a port number: {}", port))?,
            None => defaults.port,
        };

        Ok(Self {
            host,
            port,
            config_path: get("FUZZDECK_CONFIG").map(PathBuf::from),
            database: get("FUZZDECK_DB").map(PathBuf::from),
            data_dir: get("FUZZDECK_DATA_DIR").map(PathBuf::from),
            json_logs: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Orchestrator config: YAML file when given, then environment overrides
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        let mut config = match &self.config_path {
            Some(path) => OrchestratorConfig::from_yaml_file(path)
                .with_context(|| format!("Loading {}", path.display()))?,
            None => OrchestratorConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.addr(), "0.0.0.0:3000".parse().unwrap());
        assert!(s.database.is_none());
        assert!(!s.json_logs);
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("FUZZDECK_HOST", "127.0.0.1"),
            ("FUZZDECK_PORT", "8080"),
            ("FUZZDECK_DB", "/tmp/jobs.db"),
            ("LOG_FORMAT", "JSON"),
            ("FUZZDECK_CONFIG", ""),
        ])
        .unwrap();
        assert_eq!(s.addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(s.database, Some(PathBuf::from("/tmp/jobs.db")));
        assert!(s.config_path.is_none());
        assert!(s.json_logs);
    }

    #[test]
    fn test_rejects_bad_port() {
        let err = settings(&[("FUZZDECK_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("FUZZDECK_PORT"));
    }

    #[test]
    fn test_config_file_and_data_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuzzdeck.yaml");
        std::fs::write(&path, "data_dir: /srv/fuzz\nsample_interval_ms: 500\n").unwrap();

        let s = settings(&[("FUZZDECK_CONFIG", path.to_str().unwrap())]).unwrap();
        let config = s.orchestrator_config().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/fuzz"));
        assert_eq!(config.sample_interval_ms, 500);

        let s = settings(&[
            ("FUZZDECK_CONFIG", path.to_str().unwrap()),
            ("FUZZDECK_DATA_DIR", "/data"),
        ])
        .unwrap();
        assert_eq!(s.orchestrator_config().unwrap().data_dir, PathBuf::from("/data"));
    }
}
