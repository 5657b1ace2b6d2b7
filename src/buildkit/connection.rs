use anyhow::Result;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub const DEFAULT_UNIX_SOCKET: &str = "/run/buildkit/buildkitd.sock";

/// Address of a BuildKit daemon, in the forms `buildctl --addr` understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildKitAddr {
    Unix(String),
    Tcp(String),
    DockerContainer(String),
}

impl FromStr for BuildKitAddr {
    type Err = anyhow::Error;

    fn from_str(addr: &str) -> Result<Self> {
        if let Some(path) = addr.strip_prefix("unix://") {
            if path.is_empty() {
                anyhow::bail!("Empty unix socket path in BuildKit address");
            }
            Ok(BuildKitAddr::Unix(path.to_string()))
        } else if let Some(name) = addr.strip_prefix("docker-container://") {
            if name.is_empty() {
                anyhow::bail!("Empty container name in BuildKit address");
            }
            Ok(BuildKitAddr::DockerContainer(name.to_string()))
        } else if addr.starts_with("tcp://") {
            Ok(BuildKitAddr::Tcp(addr.to_string()))
        } else {
            anyhow::bail!(
                "Invalid BuildKit address format '{}'. Expected unix://, tcp:// or docker-container://",
                addr
            )
        }
    }
}

impl BuildKitAddr {
    pub fn default_unix() -> Self {
        BuildKitAddr::Unix(DEFAULT_UNIX_SOCKET.to_string())
    }

    /// Best-effort local reachability check; remote forms are assumed reachable
    pub fn looks_reachable(&self) -> bool {
        match self {
            BuildKitAddr::Unix(path) => {
                let exists = Path::new(path).exists();
                debug!("BuildKit socket {} exists: {}", path, exists);
                exists
            }
            BuildKitAddr::Tcp(_) | BuildKitAddr::DockerContainer(_) => true,
        }
    }
}

impl fmt::Display for BuildKitAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildKitAddr::Unix(path) => write!(f, "unix://{}", path),
            BuildKitAddr::Tcp(uri) => f.write_str(uri),
            BuildKitAddr::DockerContainer(name) => write!(f, "docker-container://{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            "unix:///run/buildkit/buildkitd.sock".parse::<BuildKitAddr>().unwrap(),
            BuildKitAddr::default_unix()
        );
        assert_eq!(
            "tcp://127.0.0.1:1234".parse::<BuildKitAddr>().unwrap(),
            BuildKitAddr::Tcp("tcp://127.0.0.1:1234".to_string())
        );
        assert_eq!(
            "docker-container://buildkitd".parse::<BuildKitAddr>().unwrap(),
            BuildKitAddr::DockerContainer("buildkitd".to_string())
        );
    }

    #[test]
    fn test_reject_invalid_addresses() {
        assert!("http://localhost".parse::<BuildKitAddr>().is_err());
        assert!("unix://".parse::<BuildKitAddr>().is_err());
        assert!("docker-container://".parse::<BuildKitAddr>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for addr in [
            "unix:///tmp/bk.sock",
            "tcp://10.0.0.1:1234",
            "docker-container://bk",
        ] {
            assert_eq!(addr.parse::<BuildKitAddr>().unwrap().to_string(), addr);
        }
    }
}
