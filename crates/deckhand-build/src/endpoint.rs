//! Dockerデーモンの接続先
//!
//! `DOCKER_HOST` と同じ書式（`unix://`, `npipe://`, `tcp://`, `http://`）を受け付けます。

use crate::error::{BuildError, BuildResult};
use bollard::{API_DEFAULT_VERSION, Docker};
use std::fmt;
use std::str::FromStr;

/// Unix環境のデフォルトソケット
pub const DEFAULT_UNIX_SOCKET: &str = "unix:///var/run/docker.sock";

/// Windows環境のデフォルト名前付きパイプ
pub const DEFAULT_NAMED_PIPE: &str = "npipe:////./pipe/docker_engine";

/// 接続確認（ping）のタイムアウト（秒）。ビルド中は [`crate::ImageBuilder`] が無効にする
const CLIENT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEndpoint {
    /// Unixドメインソケットのパス
    Unix(String),
    /// Windowsの名前付きパイプ
    NamedPipe(String),
    /// TCP (`host:port`)
    Tcp(String),
}

impl DaemonEndpoint {
    /// プラットフォームのデフォルト接続先
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            DaemonEndpoint::NamedPipe("//./pipe/docker_engine".to_string())
        } else {
            DaemonEndpoint::Unix("/var/run/docker.sock".to_string())
        }
    }

    /// クライアントを作成（この時点ではまだ通信しない）
    pub fn connect(&self) -> BuildResult<Docker> {
        let result = match self {
            #[cfg(unix)]
            DaemonEndpoint::Unix(path) => {
                Docker::connect_with_unix(path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            #[cfg(windows)]
            DaemonEndpoint::NamedPipe(path) => {
                Docker::connect_with_named_pipe(path, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            DaemonEndpoint::Tcp(addr) => Docker::connect_with_http(
                &format!("tcp://{}", addr),
                CLIENT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            #[allow(unreachable_patterns)]
            other => {
                return Err(BuildError::InvalidEndpoint(format!(
                    "{} is not supported on this platform",
                    other
                )));
            }
        };

        result.map_err(|source| BuildError::DaemonUnreachable {
            endpoint: self.to_string(),
            source,
        })
    }
}

impl FromStr for DaemonEndpoint {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BuildError::InvalidEndpoint(s.to_string());

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            Ok(DaemonEndpoint::Unix(path.to_string()))
        } else if let Some(pipe) = s.strip_prefix("npipe://") {
            if pipe.is_empty() {
                return Err(invalid());
            }
            Ok(DaemonEndpoint::NamedPipe(pipe.to_string()))
        } else if let Some(addr) = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("http://"))
        {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(invalid());
            }
            Ok(DaemonEndpoint::Tcp(addr.to_string()))
        } else if s.starts_with('/') {
            // スキームなしの絶対パスはソケットとみなす
            Ok(DaemonEndpoint::Unix(s.to_string()))
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for DaemonEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonEndpoint::Unix(path) => write!(f, "unix://{}", path),
            DaemonEndpoint::NamedPipe(pipe) => write!(f, "npipe://{}", pipe),
            DaemonEndpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix() {
        let endpoint: DaemonEndpoint = "unix:///var/run/docker.sock".parse().unwrap();
        assert_eq!(endpoint, DaemonEndpoint::Unix("/var/run/docker.sock".to_string()));
        assert_eq!(endpoint.to_string(), "unix:///var/run/docker.sock");
    }

    #[test]
    fn test_parse_bare_path() {
        let endpoint: DaemonEndpoint = "/tmp/docker.sock".parse().unwrap();
        assert_eq!(endpoint, DaemonEndpoint::Unix("/tmp/docker.sock".to_string()));
    }

    #[test]
    fn test_parse_tcp_and_http() {
        let tcp: DaemonEndpoint = "tcp://127.0.0.1:2375".parse().unwrap();
        let http: DaemonEndpoint = "http://127.0.0.1:2375/".parse().unwrap();
        assert_eq!(tcp, DaemonEndpoint::Tcp("127.0.0.1:2375".to_string()));
        assert_eq!(tcp, http);
    }

    #[test]
    fn test_parse_npipe() {
        let endpoint: DaemonEndpoint = DEFAULT_NAMED_PIPE.parse().unwrap();
        assert_eq!(
            endpoint,
            DaemonEndpoint::NamedPipe("//./pipe/docker_engine".to_string())
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!("ssh://host".parse::<DaemonEndpoint>().is_err());
        assert!("unix://".parse::<DaemonEndpoint>().is_err());
        assert!("docker.sock".parse::<DaemonEndpoint>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_platform_default() {
        assert_eq!(
            DaemonEndpoint::platform_default().to_string(),
            DEFAULT_UNIX_SOCKET
        );
    }
}
