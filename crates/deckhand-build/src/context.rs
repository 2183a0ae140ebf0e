//! ビルドコンテキストのアーカイブ作成
//!
//! ディレクトリを辿って tar.gz を作成します。エントリはファイル名順の
//! 深さ優先で追加されるため、変更のないディレクトリからは常に同じバイト列が
//! 得られます。シンボリックリンクは辿らず、リンク先パスのみを記録します。
//!
//! 途中で読み込みに失敗した場合は、tarの終端ブロックやgzipのトレーラーを
//! 書き出さずに中断します。受け取った側が完全なアーカイブと誤認することはありません。

use crate::error::{BuildError, BuildResult};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::stream::{self, Stream};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, Header, HeaderMode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// ストリーミング時に1回で送るチャンクサイズ
const CHUNK_SIZE: usize = 64 * 1024;

/// 送信待ちチャンクの上限（メモリ使用量は CHUNK_SIZE * CHANNEL_CAPACITY 程度）
const CHANNEL_CAPACITY: usize = 8;

/// アーカイブ作成結果の集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: u64,
    pub directories: u64,
    pub symlinks: u64,
    /// 通常ファイルの合計サイズ（圧縮前）
    pub content_bytes: u64,
}

impl ArchiveSummary {
    pub fn entries(&self) -> u64 {
        self.files + self.directories + self.symlinks
    }
}

/// アーカイブに入れるファイルの読み出し元
pub trait ContextFiles: Send + Sync + 'static {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// ローカルのファイルシステムから読む
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl ContextFiles for LocalFiles {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(path)?))
    }
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストのルートがディレクトリとして存在するか確認
    pub fn check_root(context_path: &Path) -> BuildResult<()> {
        match fs::metadata(context_path) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            _ => Err(BuildError::DirectoryNotFound(context_path.to_path_buf())),
        }
    }

    /// ビルドコンテキストをtar.gzアーカイブとしてメモリ上に作成
    ///
    /// 途中でエラーが発生した場合は作成途中のアーカイブを返さない。
    pub fn create_context(context_path: &Path) -> BuildResult<Vec<u8>> {
        let mut archive_data = Vec::new();
        Self::write_context(context_path, &mut archive_data)?;

        tracing::debug!("Build context created: {} bytes", archive_data.len());
        Ok(archive_data)
    }

    /// ビルドコンテキストをtar.gzとして `writer` に書き出す
    pub fn write_context<W: Write>(context_path: &Path, writer: W) -> BuildResult<ArchiveSummary> {
        Self::write_context_from(context_path, writer, &LocalFiles)
    }

    /// `files` からファイル内容を読んで書き出す
    ///
    /// 失敗した場合、`writer` には途中までのデータしか書かれない。
    pub fn write_context_from<W: Write>(
        context_path: &Path,
        writer: W,
        files: &dyn ContextFiles,
    ) -> BuildResult<ArchiveSummary> {
        Self::check_root(context_path)?;
        tracing::debug!("Creating build context from: {}", context_path.display());

        let encoder = GzEncoder::new(AbortableWriter::new(writer), Compression::default());
        let mut tar = Builder::new(encoder);
        tar.follow_symlinks(false);

        let summary = match Self::append_tree(&mut tar, context_path, files) {
            Ok(summary) => summary,
            Err(err) => {
                // drop時に終端ブロックとトレーラーが書かれないようにする
                tar.get_mut().get_mut().abort();
                return Err(err);
            }
        };

        let encoder = tar.into_inner().map_err(|e| entry_error(context_path, e))?;
        let mut writer = encoder.finish().map_err(|e| entry_error(context_path, e))?;
        writer.flush().map_err(|e| entry_error(context_path, e))?;

        tracing::debug!(
            "Archived {} entries ({} files, {} bytes of content)",
            summary.entries(),
            summary.files,
            summary.content_bytes
        );

        Self::check_context_size(summary.content_bytes);

        Ok(summary)
    }

    fn append_tree<W: Write>(
        tar: &mut Builder<W>,
        context_path: &Path,
        files: &dyn ContextFiles,
    ) -> BuildResult<ArchiveSummary> {
        let mut summary = ArchiveSummary::default();

        let walker = WalkDir::new(context_path)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| walk_error(context_path, e))?;
            let path = entry.path();
            let relative = archive_path(context_path, path)?;
            let metadata = entry.metadata().map_err(|e| walk_error(path, e))?;
            let file_type = metadata.file_type();

            let mut header = Header::new_gnu();
            header.set_metadata_in_mode(&metadata, HeaderMode::Complete);

            if file_type.is_dir() {
                header.set_size(0);
                tar.append_data(&mut header, &relative, io::empty())
                    .map_err(|e| entry_error(path, e))?;
                summary.directories += 1;
            } else if file_type.is_symlink() {
                let target = fs::read_link(path).map_err(|e| entry_error(path, e))?;
                header.set_size(0);
                tar.append_link(&mut header, &relative, &target)
                    .map_err(|e| entry_error(path, e))?;
                summary.symlinks += 1;
            } else if file_type.is_file() {
                let file = files.open(path).map_err(|e| entry_error(path, e))?;
                tar.append_data(&mut header, &relative, file)
                    .map_err(|e| entry_error(path, e))?;
                summary.files += 1;
                summary.content_bytes += metadata.len();
            } else {
                // ソケットやFIFOはビルドコンテキストに含めない
                tracing::debug!("Skipping special file: {}", path.display());
            }
        }

        Ok(summary)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: u64) {
        const MAX_CONTEXT_SIZE: u64 = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "Build context is large ({}MB); every file under the context directory is sent to the daemon",
                size / 1024 / 1024
            );
        }
    }
}

/// ルートからの相対パス。ルート自身は "." になる
fn archive_path(root: &Path, path: &Path) -> BuildResult<PathBuf> {
    let relative = path.strip_prefix(root).map_err(|_| BuildError::ArchiveRead {
        path: path.to_path_buf(),
        source: io::Error::other("entry is outside of the build context"),
    })?;

    if relative.as_os_str().is_empty() {
        Ok(PathBuf::from("."))
    } else {
        Ok(relative.to_path_buf())
    }
}

fn walk_error(fallback: &Path, err: walkdir::Error) -> BuildError {
    let path = err.path().unwrap_or(fallback).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
    BuildError::ArchiveRead { path, source }
}

fn entry_error(path: &Path, err: io::Error) -> BuildError {
    if err.kind() == io::ErrorKind::BrokenPipe {
        BuildError::ContextStreamClosed
    } else {
        BuildError::ArchiveRead {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

/// `abort` 後の書き込みを全て拒否する Write
struct AbortableWriter<W> {
    inner: W,
    aborted: bool,
}

impl<W: Write> AbortableWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            aborted: false,
        }
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

impl<W: Write> Write for AbortableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.aborted {
            return Err(io::Error::other("build context archive was aborted"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.aborted {
            return Err(io::Error::other("build context archive was aborted"));
        }
        self.inner.flush()
    }
}

/// チャンク単位でチャンネルに流す Write 実装
struct ChannelWriter {
    sender: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// バックグラウンドで作成されるビルドコンテキスト
///
/// アーカイブはブロッキングタスク上で作成され、チャンクごとに
/// リクエストボディとして消費される。作成に失敗した場合はストリームの
/// 最後にエラーを流し、ボディが正常に終端しないようにする。
pub struct ContextStream {
    receiver: mpsc::Receiver<io::Result<Bytes>>,
    task: ArchiveTask,
}

impl ContextStream {
    /// アーカイブ作成を開始する。tokio ランタイム上で呼び出すこと
    pub fn spawn(context_path: &Path) -> BuildResult<Self> {
        Self::spawn_from(context_path, LocalFiles)
    }

    /// `files` から読んでアーカイブを作成する
    pub fn spawn_from(context_path: &Path, files: impl ContextFiles) -> BuildResult<Self> {
        ContextBuilder::check_root(context_path)?;

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let failure = sender.clone();
        let root = context_path.to_path_buf();
        let task_root = root.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let writer = BufWriter::with_capacity(CHUNK_SIZE, ChannelWriter { sender });
            let result = ContextBuilder::write_context_from(&task_root, writer, &files);

            match &result {
                Ok(_) | Err(BuildError::ContextStreamClosed) => {}
                Err(err) => {
                    // 受信側が閉じていれば送れなくてよい
                    let _ = failure.blocking_send(Err(io::Error::other(err.to_string())));
                }
            }
            result
        });

        Ok(Self {
            receiver,
            task: ArchiveTask { root, handle },
        })
    }

    /// ボディ用のストリームと作成タスクに分割
    pub fn into_parts(
        self,
    ) -> (
        impl Stream<Item = io::Result<Bytes>> + Send + 'static,
        ArchiveTask,
    ) {
        let body = stream::unfold(self.receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        });
        (body, self.task)
    }
}

/// アーカイブ作成タスクのハンドル
pub struct ArchiveTask {
    root: PathBuf,
    handle: JoinHandle<BuildResult<ArchiveSummary>>,
}

impl ArchiveTask {
    /// 作成完了を待つ
    pub async fn wait(self) -> BuildResult<ArchiveSummary> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(BuildError::ArchiveRead {
                path: self.root,
                source: io::Error::other(e),
            }),
        }
    }
}
