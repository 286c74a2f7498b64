//! End-to-end orchestrator tests against a scripted in-process generation
//! server speaking just enough HTTP and WebSocket for one batch.

use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::SinkExt;
use image::{Rgb, RgbImage};
use photovar::remote::{RemoteConfig, RemoteOrchestrator};
use photovar::{AppEvent, EventBus};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// What the scripted server reports for finished jobs.
#[derive(Clone, Copy)]
enum ServerScript {
    /// `/history` stays empty forever, so completion handling times out.
    HistoryNeverReady,
    /// `/history` names the expected output; `/view` rejects any staged
    /// file whose name contains "slow".
    OutputsReady,
}

async fn spawn_server(script: ServerScript) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle_connection(stream, script));
        }
    });
    addr
}

async fn handle_connection(mut stream: TcpStream, script: ServerScript) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => return,
        }
    }
    let text = String::from_utf8_lossy(&head).into_owned();
    let request_line = text.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let target = parts.next().unwrap_or_default().to_owned();
    let path = target.split('?').next().unwrap_or_default().to_owned();

    if path == "/ws" {
        serve_push_channel(stream, head).await;
        return;
    }

    if method == "POST" {
        let length = text
            .lines()
            .find_map(|line| {
                line.to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
            })
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
    }

    match (method.as_str(), path.as_str()) {
        ("GET", "/system_stats") => respond(&mut stream, "200 OK", "{}").await,
        ("GET", "/view") => {
            if target.contains("slow") {
                respond(&mut stream, "404 Not Found", "{}").await;
            } else {
                respond(&mut stream, "200 OK", "{}").await;
            }
        }
        ("POST", "/prompt") => {
            respond(&mut stream, "200 OK", r#"{"prompt_id":"job-1"}"#).await;
        }
        ("GET", p) if p.starts_with("/history/") => {
            let body = match script {
                ServerScript::HistoryNeverReady => "{}".to_owned(),
                ServerScript::OutputsReady => serde_json::json!({
                    "job-1": {
                        "outputs": {
                            "9": {
                                "images": [{
                                    "filename": "final_00001_.png",
                                    "subfolder": "comfy_api_output",
                                    "type": "output"
                                }]
                            }
                        }
                    }
                })
                .to_string(),
            };
            respond(&mut stream, "200 OK", &body).await;
        }
        _ => respond(&mut stream, "404 Not Found", "{}").await,
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Complete the WebSocket handshake (whose request was already consumed
/// into `head`) and push completion signals for job-1. Frames repeat
/// because the first ones may arrive before the job id is registered on
/// the client side.
async fn serve_push_channel(stream: TcpStream, head: Vec<u8>) {
    let replay = Replay {
        consumed: head,
        pos: 0,
        inner: stream,
    };
    let Ok(mut ws) = tokio_tungstenite::accept_async(replay).await else {
        return;
    };
    let progress = serde_json::json!({
        "type": "progress",
        "data": {"value": 30, "max": 30, "prompt_id": "job-1"}
    })
    .to_string();
    let success = serde_json::json!({
        "type": "execution_success",
        "data": {"prompt_id": "job-1"}
    })
    .to_string();
    for _ in 0..60 {
        if ws.send(Message::Text(progress.clone())).await.is_err() {
            return;
        }
        if ws.send(Message::Text(success.clone())).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let _ = ws.close(None).await;
}

/// Replays bytes already read off the socket before handing the rest of
/// the stream through, so the WebSocket handshake sees the full request.
struct Replay {
    consumed: Vec<u8>,
    pos: usize,
    inner: TcpStream,
}

impl AsyncRead for Replay {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.consumed.len() {
            let remaining = &this.consumed[this.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Replay {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

fn write_fixtures(dir: &Path) {
    std::fs::write(
        dir.join("workflow.json"),
        serde_json::json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
            "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "final"}}
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(dir.join("backdrop[studio].txt"), "studio backdrop").unwrap();
}

fn config_for(dir: &Path, addr: SocketAddr) -> RemoteConfig {
    RemoteConfig::new(
        format!("http://{addr}"),
        dir.join("comfy_api_input"),
        dir.join("comfy_api_output"),
        dir.join("final"),
        dir.join("workflow.json"),
        dir.join("backdrop[studio].txt"),
    )
}

#[tokio::test]
async fn run_settles_after_completion_gives_up_without_all_done() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let input = dir.path().join("drone.png");
    RgbImage::from_pixel(8, 8, Rgb([40, 40, 40]))
        .save(&input)
        .unwrap();

    let addr = spawn_server(ServerScript::HistoryNeverReady).await;
    let mut config = config_for(dir.path(), addr);
    config.history_timeout = Duration::from_secs(2);
    config.file_timeout = Duration::from_secs(1);

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let orchestrator = RemoteOrchestrator::new(config, events);

    tokio::time::timeout(
        Duration::from_secs(20),
        orchestrator.run(&[input], &CancellationToken::new()),
    )
    .await
    .expect("run must settle once completion handling gives up")
    .unwrap();

    let mut saw_timeout_error = false;
    let mut saw_finished_status = false;
    let mut saw_all_done = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            AppEvent::Error(text) if text.contains("Timed out") => saw_timeout_error = true,
            AppEvent::Status(text) if text.contains("0 of 1 completed") => {
                saw_finished_status = true;
            }
            AppEvent::AllDone => saw_all_done = true,
            _ => {}
        }
    }
    assert!(saw_timeout_error, "expected a timeout error event");
    assert!(saw_finished_status, "expected a finished-with-failures status");
    assert!(!saw_all_done, "all-done must stay suppressed");
}

#[tokio::test]
async fn submitted_job_completes_while_later_submission_still_waits() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let fast = dir.path().join("fast.png");
    let slow = dir.path().join("slow.png");
    for path in [&fast, &slow] {
        RgbImage::from_pixel(8, 8, Rgb([9, 9, 9])).save(path).unwrap();
    }
    // the server-side output already exists when history names it
    let temp_out = dir.path().join("comfy_api_output");
    std::fs::create_dir_all(&temp_out).unwrap();
    RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))
        .save(temp_out.join("final_00001_.png"))
        .unwrap();

    let addr = spawn_server(ServerScript::OutputsReady).await;
    let mut config = config_for(dir.path(), addr);
    config.visibility_timeout = Duration::from_secs(6);

    let events = EventBus::new();
    let mut rx = events.subscribe();
    let orchestrator = RemoteOrchestrator::new(config, events);

    let started = tokio::time::Instant::now();
    let run = tokio::spawn(async move {
        orchestrator
            .run(&[fast, slow], &CancellationToken::new())
            .await
    });

    // the first job's output must land while the second submission is
    // still polling for visibility
    let saved_after = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected FileSaved before the visibility wait ends")
            .unwrap();
        if let AppEvent::FileSaved(path) = event {
            assert!(path.ends_with("final/fast_studio.png"), "got {path:?}");
            break started.elapsed();
        }
    };
    assert!(
        saved_after < Duration::from_secs(5),
        "completion was held back behind submission: {saved_after:?}"
    );

    tokio::time::timeout(Duration::from_secs(20), run)
        .await
        .expect("run must settle after the visibility timeout")
        .unwrap()
        .unwrap();
    assert!(dir.path().join("final").join("fast_studio.png").exists());
}
