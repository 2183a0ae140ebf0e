use crate::log::{BuildLogLine, LineKind};
use indicatif::{ProgressBar, ProgressStyle};

/// ビルド中のスピナー表示
///
/// ログ行はスピナーの上に流し、スピナーには最後のステップを表示する。
pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(tag: &str) -> Self {
        Self::with_bar(ProgressBar::new_spinner(), tag)
    }

    /// 何も描画しない（非TTYやテスト用）
    pub fn hidden(tag: &str) -> Self {
        Self::with_bar(ProgressBar::hidden(), tag)
    }

    fn with_bar(pb: ProgressBar, tag: &str) -> Self {
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("Building {}...", tag));

        Self { progress_bar: pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    /// スピナーの上に1行表示する。非表示時は標準出力にそのまま出す
    pub fn println(&self, text: &str) {
        if self.progress_bar.is_hidden() {
            println!("{}", text);
        } else {
            self.progress_bar.println(text);
        }
    }

    /// ログ行を表示し、ビルドステップならスピナーの表示も更新する
    pub fn line(&self, line: &BuildLogLine) {
        self.println(&line.text);
        if line.kind == LineKind::Output && line.text.starts_with("Step ") {
            self.set_message(&line.text);
        }
        self.progress_bar.tick();
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_with_message("Build completed ✓");
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_progress_tracks_steps() {
        let progress = BuildProgress::hidden("acme/app:abc123");
        assert_eq!(progress.progress_bar.message(), "Building acme/app:abc123...");

        progress.line(&BuildLogLine::output("Step 1/3 : FROM alpine"));
        assert_eq!(progress.progress_bar.message(), "Step 1/3 : FROM alpine");

        progress.line(&BuildLogLine::output(" ---> 3f53bb00af94"));
        assert_eq!(progress.progress_bar.message(), "Step 1/3 : FROM alpine");

        progress.finish_success();
        assert!(progress.progress_bar.is_finished());
    }
}
