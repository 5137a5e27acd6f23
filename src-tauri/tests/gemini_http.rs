// Drives GeminiClient against a one-shot local HTTP listener.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use provador_lib::assets::ImageAsset;
use provador_lib::settings::{Settings, SettingsFile};
use provador_lib::{EditError, EncodedImage, GeminiClient, ImageEditor, SessionController};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn settings_for(base_url: &str) -> Settings {
    let base_url = base_url.to_string();
    Settings::resolve(SettingsFile::default(), move |k: &str| match k {
        "GEMINI_API_KEY" => Some("test-key".to_string()),
        "GEMINI_MODEL" => Some("test-model".to_string()),
        "GEMINI_API_BASE_URL" => Some(base_url.clone()),
        _ => None,
    })
    .expect("settings")
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Accepts one connection, answers with `status` and `body`, and hands back
/// the raw request text.
async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = sock.read(&mut chunk).await.expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        sock.write_all(response.as_bytes()).await.expect("write");
        sock.shutdown().await.ok();
        String::from_utf8_lossy(&buf).into_owned()
    });

    (format!("http://{addr}"), handle)
}

fn request_body(raw: &str) -> Value {
    let start = raw.find("\r\n\r\n").expect("body separator") + 4;
    serde_json::from_str(&raw[start..]).expect("json body")
}

fn encoded(bytes: &[u8], mime: &str) -> EncodedImage {
    EncodedImage {
        data: B64.encode(bytes),
        mime_type: mime.to_string(),
    }
}

#[tokio::test]
async fn posts_parts_in_order_and_returns_image() {
    let result_bytes = b"\x89PNG\r\n\x1a\nedited".to_vec();
    let body = json!({
        "candidates": [{
            "content": { "parts": [
                { "text": "ok" },
                { "inlineData": { "mimeType": "image/png", "data": B64.encode(&result_bytes) } }
            ] },
            "finishReason": "STOP"
        }]
    })
    .to_string();
    let (base, server) = serve_once("200 OK", body).await;

    let client = GeminiClient::new(settings_for(&base));
    let person = encoded(b"person", "image/jpeg");
    let shirt = encoded(b"shirt", "image/png");
    let image = client
        .edit_image(&person, "Vista a camisa", Some(&shirt))
        .await
        .expect("edit");
    assert_eq!(image.decode().expect("decode"), result_bytes);

    let raw = server.await.expect("server");
    let head = raw.to_ascii_lowercase();
    assert!(head.starts_with("post /models/test-model:generatecontent http/1.1"));
    assert!(head.contains("x-goog-api-key: test-key"));

    let sent = request_body(&raw);
    let parts = sent["contents"][0]["parts"].as_array().expect("parts");
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0]["inlineData"]["data"], person.data.as_str());
    assert_eq!(parts[1]["inlineData"]["data"], shirt.data.as_str());
    assert_eq!(parts[2]["text"], "Vista a camisa");
    assert_eq!(sent["generationConfig"]["responseModalities"], json!(["IMAGE"]));
}

#[tokio::test]
async fn blocked_prompt_is_classified() {
    let body = json!({ "promptFeedback": { "blockReason": "OTHER" } }).to_string();
    let (base, server) = serve_once("200 OK", body).await;

    let client = GeminiClient::new(settings_for(&base));
    let err = client
        .edit_image(&encoded(b"p", "image/png"), "x", None)
        .await
        .unwrap_err();
    match err {
        EditError::BlockedRequest { reason } => assert_eq!(reason, "OTHER"),
        other => panic!("unexpected {other:?}"),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn error_status_becomes_service_error() {
    let body = json!({
        "error": { "code": 403, "message": "Permission denied", "status": "PERMISSION_DENIED" }
    })
    .to_string();
    let (base, server) = serve_once("403 Forbidden", body).await;

    let client = GeminiClient::new(settings_for(&base));
    let err = client
        .edit_image(&encoded(b"p", "image/png"), "x", None)
        .await
        .unwrap_err();
    match err {
        EditError::Service(msg) => {
            assert!(msg.contains("403"));
            assert!(msg.contains("Permission denied"));
        }
        other => panic!("unexpected {other:?}"),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn unparseable_body_is_service_error() {
    let (base, server) = serve_once("200 OK", "not json".to_string()).await;

    let client = GeminiClient::new(settings_for(&base));
    let err = client
        .edit_image(&encoded(b"p", "image/png"), "x", None)
        .await
        .unwrap_err();
    match err {
        EditError::Service(msg) => assert!(msg.contains("parse")),
        other => panic!("unexpected {other:?}"),
    }
    server.await.expect("server");
}

#[tokio::test]
async fn unreachable_service_is_service_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = GeminiClient::new(settings_for(&format!("http://{addr}")));
    let err = client
        .edit_image(&encoded(b"p", "image/png"), "x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Service(_)));
}

#[tokio::test]
async fn session_round_trips_file_bytes_through_the_service() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let photo = dir.path().join("eu.jpg");
    let photo_bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];
    std::fs::write(&photo, &photo_bytes)?;

    let body = json!({
        "candidates": [{
            "content": { "parts": [ { "inlineData": { "mimeType": "image/png", "data": "ZWRpdGVk" } } ] },
            "finishReason": "STOP"
        }]
    })
    .to_string();
    let (base, server) = serve_once("200 OK", body).await;

    let session = SessionController::new(GeminiClient::new(settings_for(&base)));
    session.set_primary_image(ImageAsset::from_path(&photo)?);
    session.set_instruction("Mude a cor da blusa para azul royal");
    let result = session.submit().await.expect("not pending")?;
    assert_eq!(result.decode()?, b"edited");

    let sent = request_body(&server.await?);
    let parts = sent["contents"][0]["parts"].as_array().expect("parts");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
    assert_eq!(B64.decode(parts[0]["inlineData"]["data"].as_str().unwrap_or(""))?, photo_bytes);
    assert_eq!(parts[1]["text"], "Mude a cor da blusa para azul royal");

    let view = session.snapshot();
    assert_eq!(view.result_image.as_deref(), Some("data:image/png;base64,ZWRpdGVk"));
    Ok(())
}
