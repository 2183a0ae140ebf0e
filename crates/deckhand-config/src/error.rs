use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("container-repo の値が空です")]
    EmptyContainerRepo,

    #[error("container-repo は \"owner/name\" 形式で指定してください。指定値: \"{0}\"")]
    InvalidContainerRepo(String),

    #[error("container-dir の値が空です")]
    EmptyContainerDir,

    #[error("container-dir \"{0}\" が存在しません")]
    ContainerDirNotFound(PathBuf),

    #[error(
        "バージョンを決定できません\n\n\
        ヒント:\n  • --version で明示的に指定してください\n  • gitリポジトリ内で実行すると最新コミットのハッシュが使われます"
    )]
    VersionMissing,

    #[error("gitリポジトリのHEADを取得できません: {0}")]
    GitHead(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
