//! ビルドログ
//!
//! デーモンから届く `BuildInfo` メッセージを行単位のログに変換します。
//! `stream` の出力はメッセージ境界と行境界が一致しないため、
//! 改行が来るまで断片を保持します。

use bollard::models::BuildInfo;
use std::collections::VecDeque;
use std::fmt;

/// ログ行の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// ビルドステップの出力（`stream`）
    Output,
    /// pull 等のステータスメッセージ（`status`）
    Status,
    /// デーモンがストリーム内で報告したエラー（`error` / `errorDetail`）
    Error,
}

/// デーモンが出力した1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLogLine {
    pub kind: LineKind,
    pub text: String,
}

impl BuildLogLine {
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Output,
            text: text.into(),
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Status,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == LineKind::Error
    }
}

impl fmt::Display for BuildLogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// 完了したビルドのログ（出力順）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildLog {
    lines: Vec<BuildLogLine>,
}

impl BuildLog {
    pub fn new(lines: Vec<BuildLogLine>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[BuildLogLine] {
        &self.lines
    }

    /// 行テキストのみを取り出す
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.text.as_str()).collect()
    }

    /// デーモンがストリーム内で報告した最初のエラー行
    pub fn first_error(&self) -> Option<&BuildLogLine> {
        self.lines.iter().find(|l| l.is_error())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn into_lines(self) -> Vec<BuildLogLine> {
        self.lines
    }
}

impl IntoIterator for BuildLog {
    type Item = BuildLogLine;
    type IntoIter = std::vec::IntoIter<BuildLogLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

/// `BuildInfo` メッセージを行に分解するデコーダ
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    partial: String,
    ready: VecDeque<BuildLogLine>,
}

impl LineDecoder {
    /// メッセージを1件取り込む
    pub(crate) fn push(&mut self, info: BuildInfo) {
        if let Some(stream) = info.stream {
            self.push_stream(&stream);
        }

        if let Some(status) = info.status {
            // 出力順を保つため、先に保留中の断片を確定させる
            self.flush_partial();
            self.ready.push_back(BuildLogLine::status(status));
        }

        let error = info
            .error
            .or_else(|| info.error_detail.and_then(|detail| detail.message));
        if let Some(error) = error {
            self.push_error(error);
        }
    }

    /// デーモンがストリーム内で報告したエラーを1行として取り込む
    pub(crate) fn push_error(&mut self, error: String) {
        self.flush_partial();
        self.ready.push_back(BuildLogLine::error(error));
    }

    /// メッセージとして解釈できなかった末尾のテキスト（空白のみ）を1行として取り込む
    pub(crate) fn push_trailing_text(&mut self) {
        self.flush_partial();
        self.ready.push_back(BuildLogLine::output(""));
    }

    fn push_stream(&mut self, text: &str) {
        self.partial.push_str(text);

        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            self.ready.push_back(BuildLogLine::output(line));
        }
    }

    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.ready.push_back(BuildLogLine::output(line));
        }
    }

    /// ストリーム終了時に残りの断片を確定させる
    pub(crate) fn finish(&mut self) {
        self.flush_partial();
    }

    pub(crate) fn pop(&mut self) -> Option<BuildLogLine> {
        self.ready.pop_front()
    }
}
