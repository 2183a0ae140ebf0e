use crate::builder::SubmissionState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build context directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read build context entry {path}: {source}")]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Build context stream closed before archival finished")]
    ContextStreamClosed,

    #[error("Docker daemon unreachable at {endpoint}: {source}")]
    DaemonUnreachable {
        endpoint: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("Docker daemon closed the build response for {tag} without any output")]
    EmptyDaemonResponse { tag: String },

    #[error("Docker daemon rejected the build request for {tag}: {source}")]
    DaemonRequest {
        tag: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("Invalid image tag: {0}")]
    InvalidTag(String),

    #[error("Invalid Docker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Build cancelled while {state}")]
    Cancelled { state: SubmissionState },

    #[error("Build timed out after {}s while {state}", .after.as_secs())]
    TimedOut {
        after: Duration,
        state: SubmissionState,
    },
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DirectoryNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     --container-dir でDockerfileを含むディレクトリを指定してください。",
                    path.display()
                )
            }
            BuildError::ArchiveRead { path, source } => {
                format!(
                    "ビルドコンテキストの読み込みに失敗しました: {}\n\
                     原因: {}\n\
                     \n\
                     ファイルのパーミッションを確認してください。",
                    path.display(),
                    source
                )
            }
            BuildError::DaemonUnreachable { endpoint, source } => {
                format!(
                    "Dockerに接続できません: {} ({})\n\
                     \n\
                     ヒント:\n  • Dockerが起動しているか確認してください\n  • --docker-host または DOCKER_HOST を確認してください",
                    endpoint, source
                )
            }
            BuildError::EmptyDaemonResponse { tag } => {
                format!(
                    "Dockerデーモンから応答がありませんでした: {}\n\
                     \n\
                     デーモンのログを確認してください。",
                    tag
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
pub type BuildResult<T> = Result<T>;
