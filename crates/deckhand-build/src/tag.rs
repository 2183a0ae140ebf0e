//! イメージタグ
//!
//! `repository:version` 形式のタグを組み立て、検証します。

use crate::error::{BuildError, BuildResult};
use std::fmt;

/// ビルドするイメージのタグ（例: `acme/app:abc123`）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageTag {
    repository: String,
    version: String,
}

impl ImageTag {
    /// リポジトリ名とバージョンからタグを作成
    ///
    /// リポジトリは `owner/name` 形式（`/` の前後が空でない）、
    /// バージョンは空でないこと。
    pub fn new(repository: impl Into<String>, version: impl Into<String>) -> BuildResult<Self> {
        let repository = repository.into();
        let version = version.into();

        validate_repository(&repository)?;

        if version.is_empty() {
            return Err(BuildError::InvalidTag(format!(
                "version for repository '{}' cannot be empty",
                repository
            )));
        }

        Ok(Self {
            repository,
            version,
        })
    }

    /// `repository:version` 文字列をパース
    ///
    /// レジストリのポート指定（`localhost:5000/acme/app:v1`）を考慮し、
    /// 最後の `/` より後ろにある `:` で分割する。
    pub fn parse(tag: &str) -> BuildResult<Self> {
        let name_start = tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        match tag[name_start..].rfind(':') {
            Some(offset) => {
                let split = name_start + offset;
                Self::new(&tag[..split], &tag[split + 1..])
            }
            None => Err(BuildError::InvalidTag(format!(
                "'{}' is missing a ':version' suffix",
                tag
            ))),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.version)
    }
}

/// リポジトリ名が `owner/name` 形式か検証
pub fn validate_repository(repository: &str) -> BuildResult<()> {
    match repository.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(BuildError::InvalidTag(format!(
            "repository must be in format \"owner/name\", was: \"{}\"",
            repository
        ))),
    }
}
