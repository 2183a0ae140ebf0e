//! デプロイバージョンの解決
//!
//! 優先順位:
//! 1. フラグ（`--version` / `DECKHAND_VERSION`）
//! 2. gitリポジトリのHEADコミットハッシュ

use crate::error::{ConfigError, Result};
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Output};

/// バージョンの取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Flag,
    Git,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSource::Flag => f.write_str("flag"),
            VersionSource::Git => f.write_str("git HEAD"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    pub value: String,
    pub source: VersionSource,
}

/// バージョン管理システムから現在のコミットを得る
pub trait HeadCommit {
    /// リポジトリ外なら `Ok(None)`
    fn head_commit(&self) -> Result<Option<String>>;
}

/// `git rev-parse HEAD` を使う実装
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    fn git(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(args)
            .env("LC_ALL", "C")
            .output()
    }
}

impl HeadCommit for GitCli {
    fn head_commit(&self) -> Result<Option<String>> {
        // リポジトリ内かどうかは終了ステータスで判定する
        let inside = match self.git(&["rev-parse", "--is-inside-work-tree"]) {
            Ok(output) => output.status.success(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("git is not installed; skipping version detection");
                return Ok(None);
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if !inside {
            tracing::debug!("{} is not a git repository", self.repo_dir.display());
            return Ok(None);
        }

        let output = self.git(&["rev-parse", "HEAD"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConfigError::GitHead(stderr.trim().to_string()));
        }

        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!hash.is_empty()).then_some(hash))
    }
}

/// フラグ値とバージョン管理の情報からバージョンを決定
///
/// 空文字のフラグは未指定として扱う。gitはフラグがない場合のみ参照する。
pub fn resolve_version(flag: Option<&str>, vcs: &dyn HeadCommit) -> Result<ResolvedVersion> {
    if let Some(value) = flag.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(ResolvedVersion {
            value: value.to_string(),
            source: VersionSource::Flag,
        });
    }

    match vcs.head_commit()? {
        Some(hash) => {
            tracing::debug!("Using git HEAD {} as version", hash);
            Ok(ResolvedVersion {
                value: hash,
                source: VersionSource::Git,
            })
        }
        None => Err(ConfigError::VersionMissing),
    }
}
