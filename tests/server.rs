//! HTTP API tests: start the server on a free port and drive it with reqwest.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

use knowledgeops::config::Config;
use knowledgeops::server::run_server_with_services;
use knowledgeops::services::Services;
use knowledgeops_core::backend::{Backend, BackendError};
use knowledgeops_core::embedding::Embedder;

/// Character-class embedder: vowels, consonants, digits, other.
struct ShapeEmbedder;

#[async_trait]
impl Embedder for ShapeEmbedder {
    fn model_name(&self) -> &str {
        "shape-test"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 4];
                for c in t.to_lowercase().chars() {
                    let slot = match c {
                        'a' | 'e' | 'i' | 'o' | 'u' => 0,
                        c if c.is_ascii_alphabetic() => 1,
                        c if c.is_ascii_digit() => 2,
                        _ => 3,
                    };
                    v[slot] += 1.0;
                }
                v
            })
            .collect())
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let root = tmp.path();
    let config_content = format!(
        r#"
[db]
path = '{}'

[server]
bind = "127.0.0.1:{}"
storage_dir = '{}'
max_upload_bytes = 4096
"#,
        root.join("kops.sqlite").display(),
        port,
        root.join("storage").display()
    );
    toml::from_str(&config_content).unwrap()
}

/// Start a server with the shape embedder and no chat backend.
async fn start_server(tmp: &TempDir) -> String {
    let port = find_free_port();
    let services = Services::with_backends(
        test_config_with_port(tmp, port),
        Backend::Configured(Arc::new(ShapeEmbedder)),
        Backend::Unconfigured,
    )
    .await
    .unwrap();
    tokio::spawn(run_server_with_services(Arc::new(services)));
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

fn file_form(name: &str, bytes: &[u8]) -> Form {
    Form::new().part("file", Part::bytes(bytes.to_vec()).file_name(name.to_string()))
}

async fn upload(client: &reqwest::Client, base: &str, name: &str, bytes: &[u8]) -> (u16, Value) {
    let resp = client
        .post(format!("{}/upload", base))
        .multipart(file_form(name, bytes))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_services() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["documents_count"], 0);
    assert_eq!(body["vectors_count"], 0);
    assert_eq!(body["services"]["embedding"], "configured");
    assert_eq!(body["services"]["generation"], "unconfigured");
}

#[tokio::test]
async fn test_upload_query_list_delete() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let (status, body) = upload(
        &client,
        &base,
        "handbook.md",
        b"# Handbook\n\nVacation requests go to your manager two weeks ahead.",
    )
    .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["status"], "processed_and_indexed");
    assert_eq!(body["filename"], "handbook.md");
    assert_eq!(body["file_type"], "md");
    assert_eq!(body["chunks_indexed"], 1);
    assert_eq!(body["truncated"], false);
    let id = body["document_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/query", base))
        .json(&serde_json::json!({"question": "How do vacation requests work?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert_eq!(answer["success"], true);
    assert_eq!(answer["model"], "fallback");
    assert_eq!(answer["sources"].as_array().unwrap().len(), 1);
    assert_eq!(answer["sources"][0]["metadata"]["document_id"], id.as_str());
    assert!(answer["answer"]
        .as_str()
        .unwrap()
        .starts_with("Found 1 relevant documents"));
    assert_eq!(answer["metadata"]["sources_found"], 1);
    assert_eq!(answer["metadata"]["session_id"], "default");

    let docs: Value = client
        .get(format!("{}/documents", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(docs["total"], 1);
    assert_eq!(docs["documents"][0]["id"], id.as_str());

    let resp = client
        .delete(format!("{}/documents/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let deleted: Value = resp.json().await.unwrap();
    assert_eq!(deleted["deleted"], true);
    assert_eq!(deleted["id"], id.as_str());

    let resp = client
        .delete(format!("{}/documents/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_upload_rejections() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let (status, body) = upload(&client, &base, "slides.pptx", b"whatever").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "unsupported_file_type");

    let (status, body) = upload(&client, &base, "big.txt", &[b'x'; 5000]).await;
    assert_eq!(status, 413);
    assert_eq!(body["error"]["code"], "payload_too_large");

    let resp = client
        .post(format!("{}/upload", base))
        .multipart(Form::new().text("note", "no file here"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let stats: Value = client
        .get(format!("{}/api/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_documents"], 0);
    assert_eq!(stats["total_chunks"], 0);
}

#[tokio::test]
async fn test_empty_question_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&serde_json::json!({"question": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
    assert_eq!(err["error"]["message"], "question must not be empty");

    let resp = client
        .post(format!("{}/query", base))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn test_batch_upload_stats_and_clear() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part(
            "file",
            Part::bytes(b"First note about releases.".to_vec()).file_name("one.txt"),
        )
        .part(
            "file",
            Part::bytes(b"Second note, 2024 budget.".to_vec()).file_name("two.md"),
        )
        .part("file", Part::bytes(b"??".to_vec()).file_name("three.exe"));
    let resp = client
        .post(format!("{}/upload-batch", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["results"][2]["success"], false);
    assert!(body["results"][2]["error"]
        .as_str()
        .unwrap()
        .contains("unsupported"));

    let stats: Value = client
        .get(format!("{}/api/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_documents"], 2);
    assert_eq!(stats["total_chunks"], 2);
    assert_eq!(stats["embedding_model"], "shape-test");
    assert_eq!(stats["status"], "operational");
    assert_eq!(stats["generation"]["configured"], false);
    assert_eq!(stats["generation"]["model"], "fallback");

    let cleared: Value = client
        .post(format!("{}/api/index/clear", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["cleared"], true);

    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["documents_count"], 0);
    assert_eq!(health["vectors_count"], 0);
}
