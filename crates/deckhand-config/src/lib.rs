//! deckhand configuration
//!
//! Resolves the raw flag/env values into a validated [`DeployConfig`].

pub mod error;
pub mod version;

pub use error::*;
pub use version::{GitCli, HeadCommit, ResolvedVersion, VersionSource, resolve_version};

use deckhand_build::{BuildResult, ImageTag};
use std::fmt;
use std::path::PathBuf;

/// フラグ・環境変数から渡される未検証の値
#[derive(Debug, Clone, Default)]
pub struct ConfigInput {
    /// イメージをpushするリポジトリ（`owner/name`）
    pub container_repo: Option<String>,
    /// Dockerfileを含むディレクトリ。未指定ならカレントディレクトリ
    pub container_dir: Option<PathBuf>,
    /// デプロイバージョン。未指定ならgitのHEAD
    pub version: Option<String>,
}

/// 検証済みの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub container_repo: String,
    pub container_dir: PathBuf,
    pub version: ResolvedVersion,
}

impl DeployConfig {
    /// カレントディレクトリのgitリポジトリを参照して設定を解決
    pub fn resolve(input: ConfigInput) -> Result<Self> {
        Self::resolve_with(input, &GitCli::new("."))
    }

    /// 設定を解決
    ///
    /// 検証順序: container-repo → container-dir → version
    pub fn resolve_with(input: ConfigInput, vcs: &dyn HeadCommit) -> Result<Self> {
        let container_repo = input.container_repo.unwrap_or_default();
        if container_repo.is_empty() {
            return Err(ConfigError::EmptyContainerRepo);
        }
        if deckhand_build::tag::validate_repository(&container_repo).is_err() {
            return Err(ConfigError::InvalidContainerRepo(container_repo));
        }

        let container_dir = input.container_dir.unwrap_or_else(|| PathBuf::from("."));
        if container_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyContainerDir);
        }
        if !container_dir.exists() {
            return Err(ConfigError::ContainerDirNotFound(container_dir));
        }

        let version = resolve_version(input.version.as_deref(), vcs)?;

        Ok(Self {
            container_repo,
            container_dir,
            version,
        })
    }

    /// `container_repo:version` のタグ
    pub fn image_tag(&self) -> BuildResult<ImageTag> {
        ImageTag::new(&self.container_repo, &self.version.value)
    }
}

impl fmt::Display for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "container-repo: {}", self.container_repo)?;
        writeln!(f, "container-dir:  {}", self.container_dir.display())?;
        write!(
            f,
            "version:        {} ({})",
            self.version.value, self.version.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHead(Option<&'static str>);

    impl HeadCommit for FixedHead {
        fn head_commit(&self) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn input(repo: &str, dir: &std::path::Path, version: Option<&str>) -> ConfigInput {
        ConfigInput {
            container_repo: Some(repo.to_string()),
            container_dir: Some(dir.to_path_buf()),
            version: version.map(str::to_string),
        }
    }

    #[test]
    fn test_resolve_with_flag_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = DeployConfig::resolve_with(
            input("acme/app", temp_dir.path(), Some("abc123")),
            &FixedHead(None),
        )
        .unwrap();

        assert_eq!(config.container_repo, "acme/app");
        assert_eq!(config.container_dir, temp_dir.path());
        assert_eq!(config.version.source, VersionSource::Flag);
        assert_eq!(config.image_tag().unwrap().to_string(), "acme/app:abc123");
    }

    #[test]
    fn test_resolve_with_git_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = DeployConfig::resolve_with(
            input("acme/app", temp_dir.path(), None),
            &FixedHead(Some("deadbeef")),
        )
        .unwrap();

        assert_eq!(config.version.value, "deadbeef");
        assert_eq!(config.version.source, VersionSource::Git);
    }

    #[test]
    fn test_repo_without_owner() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = DeployConfig::resolve_with(
            input("app", temp_dir.path(), Some("abc123")),
            &FixedHead(None),
        );

        match result {
            Err(ConfigError::InvalidContainerRepo(repo)) => assert_eq!(repo, "app"),
            other => panic!("expected InvalidContainerRepo, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_repo() {
        let result = DeployConfig::resolve_with(ConfigInput::default(), &FixedHead(Some("abc")));
        assert!(matches!(result, Err(ConfigError::EmptyContainerRepo)));
    }

    #[test]
    fn test_missing_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        let result = DeployConfig::resolve_with(
            input("acme/app", &missing, Some("abc123")),
            &FixedHead(None),
        );

        assert!(matches!(result, Err(ConfigError::ContainerDirNotFound(p)) if p == missing));
    }

    #[test]
    fn test_empty_dir() {
        let result = DeployConfig::resolve_with(
            input("acme/app", std::path::Path::new(""), Some("abc123")),
            &FixedHead(None),
        );
        assert!(matches!(result, Err(ConfigError::EmptyContainerDir)));
    }

    #[test]
    fn test_dir_defaults_to_current_dir() {
        let config = DeployConfig::resolve_with(
            ConfigInput {
                container_repo: Some("acme/app".to_string()),
                container_dir: None,
                version: Some("v1".to_string()),
            },
            &FixedHead(None),
        )
        .unwrap();

        assert_eq!(config.container_dir, PathBuf::from("."));
    }

    #[test]
    fn test_version_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result =
            DeployConfig::resolve_with(input("acme/app", temp_dir.path(), None), &FixedHead(None));
        assert!(matches!(result, Err(ConfigError::VersionMissing)));
    }

    #[test]
    fn test_display() {
        let config = DeployConfig {
            container_repo: "acme/app".to_string(),
            container_dir: PathBuf::from("./app"),
            version: ResolvedVersion {
                value: "abc123".to_string(),
                source: VersionSource::Git,
            },
        };

        let text = config.to_string();
        assert!(text.contains("container-repo: acme/app"));
        assert!(text.contains("abc123 (git HEAD)"));
    }
}
