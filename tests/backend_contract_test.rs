//! Reply handling of `BackendClient` against hand-written backend replies.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use spi_sim_client::backend::{BackendClient, LoadDriverRequest, Method, RawReply, Transport};
use spi_sim_client::error::{ClientError, Result};

/// Answers each request with the next canned reply.
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Result<RawReply>>>,
    seen: Mutex<Vec<(Method, String, Option<Value>)>>,
}

impl Scripted {
    fn with(replies: Vec<Result<RawReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::default(),
        })
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<RawReply> {
        self.seen
            .lock()
            .unwrap()
            .push((method, path.to_string(), body));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RawReply::empty(404)))
    }
}

#[tokio::test]
async fn status_with_null_device_decodes_to_empty_string() {
    let transport = Scripted::with(vec![Ok(RawReply::json(
        200,
        json!({
            "status": "success",
            "data": {
                "backend": {"status": true, "port": 5001},
                "frontend": {"status": false, "port": 5173},
                "driver": {"status": false, "device": null}
            }
        }),
    ))]);
    let client = BackendClient::new(transport.clone());

    let status = client.system_status().await.unwrap();
    assert!(status.backend.up);
    assert!(!status.frontend.up);
    assert_eq!(status.driver.device, "");

    let seen = transport.seen.lock().unwrap();
    assert_eq!(seen[0].0, Method::Get);
    assert_eq!(seen[0].1, "system/status");
}

#[tokio::test]
async fn rejection_without_body_synthesizes_message() {
    let client = BackendClient::new(Scripted::with(vec![Ok(RawReply::empty(503))]));
    let err = client.unload_driver().await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP error! status: 503");
    assert!(matches!(err, ClientError::Rejected { status: 503, .. }));
}

#[tokio::test]
async fn error_field_is_used_when_message_is_absent() {
    let client = BackendClient::new(Scripted::with(vec![Ok(RawReply::json(
        400,
        json!({"error": "Sequences must be a list"}),
    ))]));
    let err = client.replace_sequences(&[]).await.unwrap_err();
    assert_eq!(err.to_string(), "Sequences must be a list");
}

#[tokio::test]
async fn soft_failure_on_load_is_not_success() {
    let client = BackendClient::new(Scripted::with(vec![Ok(RawReply::json(
        200,
        json!({"status": "error", "message": "insmod: File exists"}),
    ))]));
    let request = LoadDriverRequest {
        device_name: "spi_test".into(),
        sequences: Vec::new(),
    };
    let err = client.load_driver(&request).await.unwrap_err();
    assert!(matches!(err, ClientError::SoftFailure(ref m) if m == "insmod: File exists"));
}

#[tokio::test]
async fn load_success_returns_backend_message() {
    let client = BackendClient::new(Scripted::with(vec![Ok(RawReply::json(
        200,
        json!({"status": "success", "message": "Driver loaded successfully"}),
    ))]));
    let request = LoadDriverRequest {
        device_name: "spi_test".into(),
        sequences: Vec::new(),
    };
    assert_eq!(
        client.load_driver(&request).await.unwrap().as_deref(),
        Some("Driver loaded successfully")
    );
}

#[tokio::test]
async fn transport_errors_pass_through() {
    let client = BackendClient::new(Scripted::with(vec![Err(ClientError::Transport(
        "connection refused".into(),
    ))]));
    assert!(matches!(
        client.fetch_logs().await,
        Err(ClientError::Transport(_))
    ));
}
