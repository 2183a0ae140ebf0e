//! テスト用のスタブDockerデーモン
//!
//! Unixソケット上で `/_ping` と `/build` だけに応答する。

use deckhand_build::DaemonEndpoint;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// `/build` への応答内容
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum BuildReply {
    /// JSONメッセージを1行ずつ返す
    Messages(Vec<String>),
    /// ボディなしで閉じる
    Empty,
    /// エラーステータスを返す
    Status(u16, String),
    /// 1メッセージ返した後、応答を閉じずに待ち続ける
    Hang(String),
    /// ボディをそのまま返す
    Raw(String),
}

/// `{"stream": "<text>\n"}` 形式のメッセージ
#[allow(dead_code)]
pub fn stream_message(text: &str) -> String {
    format!(r#"{{"stream":"{}\n"}}"#, text)
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub target: String,
    pub body: Vec<u8>,
    /// ボディを終端まで受け取れたか
    pub complete: bool,
}

pub struct StubDaemon {
    socket: PathBuf,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: JoinHandle<()>,
    _dir: TempDir,
}

impl StubDaemon {
    pub async fn start(reply: BuildReply) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = requests.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = reply.clone();
                let captured = captured.clone();
                tokio::spawn(async move {
                    handle_connection(stream, reply, captured).await;
                });
            }
        });

        Self {
            socket,
            requests,
            handle,
            _dir: dir,
        }
    }

    pub fn endpoint(&self) -> DaemonEndpoint {
        DaemonEndpoint::Unix(self.socket.to_string_lossy().into_owned())
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn build_requests(&self) -> Vec<CapturedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.target.contains("/build"))
            .collect()
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: UnixStream,
    reply: BuildReply,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut chunked = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
                _ => {}
            }
        }
    }

    let (body, complete) = if chunked {
        read_chunked(&mut reader).await
    } else {
        let mut body = vec![0u8; content_length];
        let complete = reader.read_exact(&mut body).await.is_ok();
        (body, complete)
    };

    captured.lock().unwrap().push(CapturedRequest {
        method,
        target: target.clone(),
        body,
        complete,
    });

    // 途中で切られたリクエストには応答しない
    if !complete {
        return;
    }

    let mut stream = reader.into_inner();

    if target.contains("/_ping") {
        write_response(&mut stream, 200, "text/plain", b"OK").await;
        return;
    }

    match reply {
        BuildReply::Messages(messages) => {
            let mut body = String::new();
            for message in messages {
                body.push_str(&message);
                body.push('\n');
            }
            write_response(&mut stream, 200, "application/json", body.as_bytes()).await;
        }
        BuildReply::Empty => {
            write_response(&mut stream, 200, "application/json", b"").await;
        }
        BuildReply::Raw(body) => {
            write_response(&mut stream, 200, "application/json", body.as_bytes()).await;
        }
        BuildReply::Status(code, message) => {
            let body = format!(r#"{{"message":"{}"}}"#, message);
            write_response(&mut stream, code, "application/json", body.as_bytes()).await;
        }
        BuildReply::Hang(message) => {
            let head = "HTTP/1.1 200 OK\r\n\
                        Content-Type: application/json\r\n\
                        Transfer-Encoding: chunked\r\n\r\n";
            let data = format!("{}\n", message);
            let chunk = format!("{:x}\r\n{}\r\n", data.len(), data);
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(chunk.as_bytes()).await;
            let _ = stream.flush().await;
            std::future::pending::<()>().await;
        }
    }
}

/// チャンク形式のボディを読む。終端チャンクまで読めたら `true`
async fn read_chunked(reader: &mut BufReader<UnixStream>) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return (body, false);
        }
        let size_field = line.trim().split(';').next().unwrap_or("0");
        let size = usize::from_str_radix(size_field, 16).unwrap_or(0);

        if size == 0 {
            // トレーラーを読み飛ばす
            loop {
                let mut trailer = String::new();
                let n = reader.read_line(&mut trailer).await.unwrap_or(0);
                if n == 0 {
                    return (body, false);
                }
                if trailer == "\r\n" {
                    return (body, true);
                }
            }
        }

        let mut chunk = vec![0u8; size];
        if reader.read_exact(&mut chunk).await.is_err() {
            return (body, false);
        }
        body.extend_from_slice(&chunk);

        let mut crlf = [0u8; 2];
        if reader.read_exact(&mut crlf).await.is_err() {
            return (body, false);
        }
    }
}

async fn write_response(stream: &mut UnixStream, code: u16, content_type: &str, body: &[u8]) {
    let reason = if code == 200 { "OK" } else { "Error" };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        code,
        reason,
        content_type,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(body).await;
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}
