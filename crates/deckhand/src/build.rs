use colored::Colorize;
use deckhand_build::{
    BuildProgress, BuildRequest, BuildSignal, CancellationToken, DaemonEndpoint, LineKind,
    build_directory,
};
use deckhand_config::{ConfigInput, DeployConfig};
use std::time::Duration;

/// 接続先を決定（CLI / DOCKER_HOST > プラットフォームのデフォルト）
fn resolve_endpoint(docker_host: Option<&str>) -> anyhow::Result<DaemonEndpoint> {
    match docker_host.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => host
            .parse::<DaemonEndpoint>()
            .map_err(|e| anyhow::anyhow!("{}", e.user_message())),
        None => Ok(DaemonEndpoint::platform_default()),
    }
}

/// Ctrl-C でビルドをキャンセルする
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling build");
            ctrl_c_token.cancel();
        }
    });
    token
}

/// ビルドコマンドを処理
pub async fn handle_build_command(
    input: ConfigInput,
    docker_host: Option<&str>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    // 設定の解決（アーカイブ作成・デーモン接続より前に検証する）
    let config = DeployConfig::resolve(input)?;
    let tag = config
        .image_tag()
        .map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;
    let endpoint = resolve_endpoint(docker_host)?;

    println!("{}", "Dockerイメージをビルド中...".green());
    println!("イメージ: {}", tag.to_string().cyan());
    println!(
        "コンテキスト: {}",
        config.container_dir.display().to_string().cyan()
    );
    println!(
        "バージョン: {} ({})",
        config.version.value.cyan(),
        config.version.source
    );
    tracing::debug!("Docker endpoint: {}", endpoint);
    println!();

    let signal =
        BuildSignal::new(cancel_on_ctrl_c()).with_timeout(timeout_secs.map(Duration::from_secs));
    let request = BuildRequest::new(&config.container_dir, tag.clone());
    let progress = BuildProgress::new(&tag.to_string());

    let result = build_directory(&request, &endpoint, &signal, |line| match line.kind {
        LineKind::Error => progress.println(&line.text.red().to_string()),
        _ => progress.line(line),
    })
    .await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            progress.finish_error(&e.to_string());
            return Err(anyhow::anyhow!("{}", e.user_message()));
        }
    };

    // デーモンはビルド失敗をログ内のエラー行として返す
    if let Some(error) = outcome.log.first_error() {
        progress.finish_error(&error.text);
        return Err(anyhow::anyhow!(
            "ビルドに失敗しました: {}\n\nDockerfileの内容を確認してください。",
            error.text
        ));
    }

    progress.finish_success();
    println!();
    println!("{} {}", "✓".green().bold(), format!("{} をビルドしました", tag).green());
    Ok(())
}
