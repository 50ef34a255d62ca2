//! Test server configuration loaded from a job's working directory
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Error, Result};

/// Name of the configuration file inside a working directory
pub const CONFIG_FILE: &str = "apiproc-test.toml";

/// How to run the test server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestRunConfig {
    /// Program started as the test server
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the server
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Kill the server if it runs longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TestRunConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl std::str::FromStr for TestRunConfig {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

/// Load the configuration file from given directory
pub async fn load_config(working_dir: &Path) -> Result<TestRunConfig> {
    let path = working_dir.join(CONFIG_FILE);
    debug!("load_config {}", path.display());
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingConfig(path))
        }
        Err(source) => return Err(Error::ReadConfig { path, source }),
    };
    contents
        .parse()
        .map_err(|source| Error::InvalidConfig { path, source })
}
