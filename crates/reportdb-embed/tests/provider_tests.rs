use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use reportdb_core::config::{ProviderKind, ProviderSettings};
use reportdb_core::error::Error;
use reportdb_core::traits::EmbedProvider;
use reportdb_embed::{provider_from_settings, OpenAiEmbedder};

/// Answers exactly one HTTP request with the given status, extra headers and body.
async fn serve_once(status: &'static str, headers: &'static str, body: &'static str) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else { return };
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(n) = sock.read(&mut chunk).await else { return };
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let len = text[..head_end]
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().parse::<usize>().unwrap_or(0)))
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + len {
                    break;
                }
            }
        }
        let resp = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{headers}\r\n{body}",
            body.len()
        );
        let _ = sock.write_all(resp.as_bytes()).await;
        let _ = sock.shutdown().await;
    });
    Ok(format!("http://{addr}"))
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn parses_embeddings_in_index_order() -> anyhow::Result<()> {
    let base = serve_once(
        "200 OK",
        "",
        r#"{"object":"list","data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}],"model":"m"}"#,
    )
    .await?;
    let e = OpenAiEmbedder::new(&base, "m", "test-key", 2)?;
    let out = e.embed_batch(&texts(&["a", "b"])).await?;
    assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    Ok(())
}

#[tokio::test]
async fn too_many_requests_is_rate_limited() -> anyhow::Result<()> {
    let base = serve_once("429 Too Many Requests", "retry-after: 3\r\n", r#"{"error":"slow down"}"#).await?;
    let e = OpenAiEmbedder::new(&base, "m", "test-key", 2)?;
    let err = e.embed_batch(&texts(&["a"])).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)), "{err:?}");
    assert!(err.is_transient());
    Ok(())
}

#[tokio::test]
async fn server_error_is_unavailable() -> anyhow::Result<()> {
    let base = serve_once("503 Service Unavailable", "", "{}").await?;
    let e = OpenAiEmbedder::new(&base, "m", "test-key", 2)?;
    let err = e.embed_batch(&texts(&["a"])).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn auth_failure_is_not_transient() -> anyhow::Result<()> {
    let base = serve_once("401 Unauthorized", "", r#"{"error":"bad key"}"#).await?;
    let e = OpenAiEmbedder::new(&base, "m", "wrong", 2)?;
    let err = e.embed_batch(&texts(&["a"])).await.unwrap_err();
    assert!(!err.is_transient(), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_is_unavailable() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    let e = OpenAiEmbedder::new(&format!("http://{addr}"), "m", "k", 2)?;
    let err = e.embed_batch(&texts(&["a"])).await.unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn settings_select_provider() -> anyhow::Result<()> {
    let hashing = ProviderSettings { kind: ProviderKind::Hashing, dimension: 32, ..ProviderSettings::default() };
    let p = provider_from_settings(&hashing)?;
    assert_eq!(p.embedder_id(), "hashing:xxh64:d32");
    assert_eq!(p.embed_batch(&texts(&["seoul"])).await?[0].len(), 32);
    Ok(())
}
