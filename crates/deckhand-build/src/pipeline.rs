//! アーカイブ作成からビルド送信までの一連の処理

use crate::builder::{BuildSignal, ContextBody, ImageBuilder, SubmissionState};
use crate::context::{ArchiveSummary, ContextBuilder, ContextFiles, ContextStream, LocalFiles};
use crate::endpoint::DaemonEndpoint;
use crate::error::{BuildError, Result};
use crate::log::{BuildLog, BuildLogLine};
use crate::tag::ImageTag;
use std::path::PathBuf;

/// ディレクトリをビルドする要求
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    pub tag: ImageTag,
}

impl BuildRequest {
    pub fn new(context_dir: impl Into<PathBuf>, tag: ImageTag) -> Self {
        Self {
            context_dir: context_dir.into(),
            tag,
        }
    }
}

/// ビルド結果
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub log: BuildLog,
    /// デーモンがボディを読み切る前に応答を閉じた場合は `None`
    pub archive: Option<ArchiveSummary>,
}

/// ディレクトリをアーカイブしながらデーモンに送り、ビルド出力を返す
///
/// 順序:
/// 1. コンテキストディレクトリの存在確認
/// 2. デーモンへの接続確認
/// 3. アーカイブを作成しながら送信し、出力を1行ずつ `on_line` に渡す
///
/// アーカイブ作成に失敗した場合はリクエストボディを途中で打ち切り、
/// デーモン側のエラーよりもそちらを返す。
pub async fn build_directory(
    request: &BuildRequest,
    endpoint: &DaemonEndpoint,
    signal: &BuildSignal,
    on_line: impl FnMut(&BuildLogLine),
) -> Result<BuildOutcome> {
    build_directory_from(request, LocalFiles, endpoint, signal, on_line).await
}

/// [`build_directory`] と同じだが、ファイル内容を `files` から読む
pub async fn build_directory_from(
    request: &BuildRequest,
    files: impl ContextFiles,
    endpoint: &DaemonEndpoint,
    signal: &BuildSignal,
    on_line: impl FnMut(&BuildLogLine),
) -> Result<BuildOutcome> {
    tracing::debug!("Build submission for {}: {}", request.tag, SubmissionState::Idle);

    ContextBuilder::check_root(&request.context_dir)?;

    let armed = signal.arm();
    let builder = ImageBuilder::connect_until(endpoint, &armed).await?;

    let (body, archive_task) =
        ContextStream::spawn_from(&request.context_dir, files)?.into_parts();
    let log_result = builder
        .start(ContextBody::streamed(body), &request.tag, armed)
        .collect_with(on_line)
        .await;

    // キャンセル時は作成タスクの終了を待たない（チャンネルが閉じて自然に止まる）
    if let Err(err @ (BuildError::Cancelled { .. } | BuildError::TimedOut { .. })) = log_result {
        return Err(err);
    }

    let archive_result = archive_task.wait().await;

    match (log_result, archive_result) {
        (_, Err(err @ BuildError::ArchiveRead { .. })) => Err(err),
        (Err(err), _) => Err(err),
        (Ok(log), Ok(summary)) => {
            tracing::debug!(
                "Sent build context for {}: {} entries",
                request.tag,
                summary.entries()
            );
            Ok(BuildOutcome {
                log,
                archive: Some(summary),
            })
        }
        (Ok(log), Err(BuildError::ContextStreamClosed)) => {
            tracing::debug!("Daemon closed the response before reading the whole build context");
            Ok(BuildOutcome { log, archive: None })
        }
        (Ok(_), Err(err)) => Err(err),
    }
}
