//! イメージビルドの送信
//!
//! ビルドコンテキストとタグをデーモンに送り、返ってくるビルド出力を
//! 行単位で読み出します。ビルド失敗はストリーム内のエラー行として
//! 届くため、ここでは解釈せず呼び出し側に渡します。

use crate::endpoint::DaemonEndpoint;
use crate::error::{BuildError, Result};
use crate::log::{BuildLog, BuildLogLine, LineDecoder};
use crate::tag::ImageTag;
use bollard::Docker;
use bollard::models::BuildInfo;
use bollard::query_parameters::BuildImageOptionsBuilder;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use http_body_util::{Either, Full};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 1回のビルド送信の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Connecting,
    Sending,
    Streaming,
    Completed,
    Failed,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionState::Idle => "idle",
            SubmissionState::Connecting => "connecting to the daemon",
            SubmissionState::Sending => "sending the build context",
            SubmissionState::Streaming => "streaming build output",
            SubmissionState::Completed => "completed",
            SubmissionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// リクエストボディとして送るビルドコンテキスト
pub enum ContextBody {
    /// メモリ上に作成済みのアーカイブ
    Buffered(Vec<u8>),
    /// 作成しながら送るアーカイブ。エラーが流れるとリクエストを中断する
    Streamed(Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>),
}

impl ContextBody {
    pub fn streamed(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        ContextBody::Streamed(Box::pin(stream))
    }
}

/// キャンセルと期限
#[derive(Debug, Clone, Default)]
pub struct BuildSignal {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl BuildSignal {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 期限の起点を確定させる
    pub(crate) fn arm(&self) -> ArmedSignal {
        ArmedSignal {
            cancel: self.cancel.clone(),
            deadline: self.timeout.map(|t| (Instant::now() + t, t)),
        }
    }
}

/// 期限が確定したシグナル
#[derive(Debug, Clone)]
pub(crate) struct ArmedSignal {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl ArmedSignal {
    /// キャンセルまたは期限切れになるまで待ち、対応するエラーを返す
    pub(crate) async fn interrupted(&self, state: SubmissionState) -> BuildError {
        let deadline = async {
            match self.deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => BuildError::Cancelled { state },
            _ = deadline => BuildError::TimedOut {
                after: self.deadline.map(|(_, t)| t).unwrap_or_default(),
                state,
            },
        }
    }
}

/// 応答の末尾に行区切りのJSONとして解釈できないバイトが残った場合のエラーか
///
/// bollard のデコーダは空白だけの行を読み飛ばせず、ストリーム終端で
/// この io エラーを返す。
fn is_trailing_text(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Other && err.to_string() == "bytes remaining on stream"
}

type InfoStream<'a> =
    Pin<Box<dyn Stream<Item = std::result::Result<BuildInfo, bollard::errors::Error>> + 'a>>;

/// デーモンからのビルド出力を1行ずつ返すストリーム
///
/// 1度だけ消費できる。キャンセルされるとデーモンとの接続を破棄する。
pub struct BuildLogStream<'a> {
    inner: Option<InfoStream<'a>>,
    decoder: LineDecoder,
    signal: ArmedSignal,
    tag: String,
    state: SubmissionState,
    received: usize,
}

impl<'a> BuildLogStream<'a> {
    fn new(inner: InfoStream<'a>, tag: String, signal: ArmedSignal) -> Self {
        tracing::debug!("Build submission for {}: {}", tag, SubmissionState::Sending);
        Self {
            inner: Some(inner),
            decoder: LineDecoder::default(),
            signal,
            tag,
            state: SubmissionState::Sending,
            received: 0,
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    fn transition(&mut self, state: SubmissionState) {
        if self.state != state {
            tracing::debug!("Build submission for {}: {} -> {}", self.tag, self.state, state);
            self.state = state;
        }
    }

    /// エラー時はデーモンとの接続を破棄して終端状態にする
    fn fail(&mut self, err: BuildError) -> Option<Result<BuildLogLine>> {
        self.inner = None;
        self.transition(SubmissionState::Failed);
        Some(Err(err))
    }

    /// 次の行を取得。ストリームが正常に閉じられたら `None`
    pub async fn next(&mut self) -> Option<Result<BuildLogLine>> {
        loop {
            if let Some(line) = self.decoder.pop() {
                return Some(Ok(line));
            }

            let inner = self.inner.as_mut()?;
            let polled = tokio::select! {
                biased;
                err = self.signal.interrupted(self.state) => Err(err),
                item = inner.next() => Ok(item),
            };

            match polled {
                Err(err) => return self.fail(err),
                Ok(Some(Ok(info))) => {
                    self.received += 1;
                    self.transition(SubmissionState::Streaming);
                    self.decoder.push(info);
                }
                // bollard は `error` を含むメッセージをエラーとして返すが、
                // ビルド失敗はログの一部として呼び出し側に渡す
                Ok(Some(Err(bollard::errors::Error::DockerStreamError { error }))) => {
                    self.received += 1;
                    self.transition(SubmissionState::Streaming);
                    self.decoder.push_error(error);
                }
                Ok(Some(Err(bollard::errors::Error::IOError { err }))) if is_trailing_text(&err) => {
                    // JSONとして読めない空白だけの行で応答が終わった
                    tracing::debug!("Build output for {} ended with non-JSON text", self.tag);
                    self.inner = None;
                    self.decoder.push_trailing_text();
                    self.decoder.finish();
                    self.transition(SubmissionState::Completed);
                }
                Ok(Some(Err(source))) => {
                    let tag = self.tag.clone();
                    return self.fail(BuildError::DaemonRequest { tag, source });
                }
                Ok(None) => {
                    self.inner = None;
                    if self.received == 0 {
                        let tag = self.tag.clone();
                        return self.fail(BuildError::EmptyDaemonResponse { tag });
                    }
                    self.decoder.finish();
                    self.transition(SubmissionState::Completed);
                }
            }
        }
    }

    /// 最後まで読み切る。行ごとに `on_line` を呼ぶ
    pub async fn collect_with(mut self, mut on_line: impl FnMut(&BuildLogLine)) -> Result<BuildLog> {
        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            let line = line?;
            on_line(&line);
            lines.push(line);
        }
        Ok(BuildLog::new(lines))
    }
}

/// ビルドリクエストのクライアント側タイムアウト（実質無制限）
const BUILD_REQUEST_TIMEOUT: Duration = Duration::MAX;

/// ビルドデーモンへのイメージビルド送信
pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    /// ビルドの期限は [`BuildSignal`] で管理するため、クライアント側の
    /// リクエストタイムアウトは無効にする
    pub fn new(docker: Docker) -> Self {
        Self {
            docker: docker.with_timeout(BUILD_REQUEST_TIMEOUT),
        }
    }

    /// 接続先に接続し、デーモンが応答することを確認する
    ///
    /// 失敗してもリトライしない。
    pub async fn connect(endpoint: &DaemonEndpoint) -> Result<Self> {
        Self::connect_until(endpoint, &BuildSignal::default().arm()).await
    }

    /// キャンセルまたは期限切れまでに接続できなければ失敗する
    pub(crate) async fn connect_until(endpoint: &DaemonEndpoint, signal: &ArmedSignal) -> Result<Self> {
        tokio::select! {
            biased;
            err = signal.interrupted(SubmissionState::Connecting) => Err(err),
            result = Self::ping(endpoint) => result,
        }
    }

    async fn ping(endpoint: &DaemonEndpoint) -> Result<Self> {
        tracing::debug!("Build submission: {}", SubmissionState::Connecting);
        tracing::debug!("Connecting to Docker daemon at {}", endpoint);

        let docker = endpoint.connect()?;
        docker
            .ping()
            .await
            .map_err(|source| BuildError::DaemonUnreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;

        Ok(Self::new(docker))
    }

    /// ビルドを開始し、出力を1行ずつ返すストリームを得る
    pub fn build_stream(
        &self,
        context: ContextBody,
        tag: &ImageTag,
        signal: &BuildSignal,
    ) -> BuildLogStream<'_> {
        self.start(context, tag, signal.arm())
    }

    pub(crate) fn start(
        &self,
        context: ContextBody,
        tag: &ImageTag,
        signal: ArmedSignal,
    ) -> BuildLogStream<'_> {
        let tag = tag.to_string();
        tracing::info!("Building image: {}", tag);

        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(&tag)
            .rm(true) // 中間コンテナを削除
            .forcerm(true) // ビルド失敗時も中間コンテナを削除
            .build();

        let body = match context {
            ContextBody::Buffered(data) => Either::Left(Full::new(Bytes::from(data))),
            ContextBody::Streamed(stream) => bollard::body_try_stream(stream),
        };

        let stream = self.docker.build_image(options, None, Some(body));
        BuildLogStream::new(Box::pin(stream), tag, signal)
    }

    /// イメージをビルドし、デーモンの出力を全て返す
    pub async fn build_image(
        &self,
        context: ContextBody,
        tag: &ImageTag,
        signal: &BuildSignal,
    ) -> Result<BuildLog> {
        let log = self
            .build_stream(context, tag, signal)
            .collect_with(|line| tracing::trace!("{}", line))
            .await?;

        tracing::info!("Build output complete for {}: {} lines", tag, log.len());
        Ok(log)
    }
}
