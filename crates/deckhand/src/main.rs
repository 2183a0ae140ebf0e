mod build;

use clap::{Args, Parser, Subcommand};
use deckhand_config::{ConfigInput, DeployConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(about = "ディレクトリからDockerイメージをビルドし、gitのコミットでタグ付けする", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// デプロイ設定のフラグ
#[derive(Args, Debug, Clone)]
struct DeployArgs {
    /// イメージをpushするリポジトリ (owner/name)
    #[arg(long = "container-repo", env = "DECKHAND_CONTAINER_REPO")]
    container_repo: Option<String>,
    /// Dockerfileを含むディレクトリ（デフォルト: カレントディレクトリ）
    #[arg(long = "container-dir", env = "DECKHAND_CONTAINER_DIR")]
    container_dir: Option<PathBuf>,
    /// リリースバージョン。イメージタグとして使用
    /// （デフォルト: gitリポジトリ内なら最新コミットのハッシュ）
    #[arg(long = "version", env = "DECKHAND_VERSION")]
    version: Option<String>,
}

impl From<DeployArgs> for ConfigInput {
    fn from(args: DeployArgs) -> Self {
        ConfigInput {
            container_repo: args.container_repo,
            container_dir: args.container_dir,
            version: args.version,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// コンテナイメージをビルド
    Build {
        #[command(flatten)]
        deploy: DeployArgs,
        /// Dockerデーモンの接続先 (unix:///var/run/docker.sock, tcp://host:2375 等)
        #[arg(long = "docker-host", env = "DOCKER_HOST")]
        docker_host: Option<String>,
        /// ビルド全体のタイムアウト（秒）
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// 解決された設定を表示
    Config {
        #[command(flatten)]
        deploy: DeployArgs,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ（ビルド出力はstdout）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("deckhand {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Config { deploy } => {
            let config = DeployConfig::resolve(deploy.into())?;
            println!("{}", config);
            Ok(())
        }
        Commands::Build {
            deploy,
            docker_host,
            timeout,
        } => build::handle_build_command(deploy.into(), docker_host.as_deref(), timeout).await,
    }
}
