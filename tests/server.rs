//! HTTP surface over a real listener.

mod common;

use common::*;
use labtrack_ingest::model::ErrorResponse;
use labtrack_ingest::server::{router, AppState, ReportView, OWNER_HEADER};
use labtrack_ingest::{
    Gateway, IngestConfig, InlineTrigger, Orchestrator, ProcessResponse, ReportStatus,
    UploadResponse,
};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;

struct TestServer {
    base: String,
    client: reqwest::Client,
}

async fn start(analyzer: AnalyzerScript) -> TestServer {
    let b = backends();
    let config = IngestConfig::default();
    let orchestrator = Orchestrator::new(
        b.stores.clone(),
        FakeExtractor::new(ExtractorScript::Reply(biogroup_output())),
        config.clone(),
    )
    .with_analyzer(FakeAnalyzer::new(analyzer));
    let gateway = Gateway::new(
        b.stores.clone(),
        Arc::new(InlineTrigger::new(orchestrator.clone())),
        config.clone(),
    )
    .with_decryptor(Arc::new(FakeDecryptor));
    let state = AppState {
        gateway: Arc::new(gateway),
        orchestrator,
        stores: b.stores,
        max_upload_bytes: config.max_upload_bytes,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    TestServer {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
    }
}

fn pdf_form(name: &str, bytes: Vec<u8>) -> Form {
    Form::new().part("file", Part::bytes(bytes).file_name(name.to_string()))
}

impl TestServer {
    async fn upload(&self, owner: Option<&str>, form: Form) -> reqwest::Response {
        let mut req = self.client.post(format!("{}/api/upload", self.base)).multipart(form);
        if let Some(owner) = owner {
            req = req.header(OWNER_HEADER, owner);
        }
        req.send().await.unwrap()
    }

    async fn report(&self, owner: &str, id: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/api/reports/{id}", self.base))
            .header(OWNER_HEADER, owner)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn upload_then_read_back_results() {
    let server = start(AnalyzerScript::Text).await;

    let resp = server
        .upload(Some(OWNER), pdf_form("bilan.pdf", plain_pdf()))
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body.get("reportId").is_some());
    let receipt: UploadResponse = serde_json::from_value(body).unwrap();

    let resp = server.report(OWNER, &receipt.report_id).await;
    assert_eq!(resp.status(), 200);
    let view: ReportView = resp.json().await.unwrap();
    assert_eq!(view.report.status, ReportStatus::Completed);
    assert_eq!(view.results.len(), 3);
}

#[tokio::test]
async fn reports_are_private_to_their_owner() {
    let server = start(AnalyzerScript::Text).await;
    let receipt: UploadResponse = server
        .upload(Some(OWNER), pdf_form("bilan.pdf", plain_pdf()))
        .await
        .json()
        .await
        .unwrap();

    let resp = server.report("someone-else", &receipt.report_id).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn missing_owner_is_401() {
    let server = start(AnalyzerScript::Text).await;
    let resp = server.upload(None, pdf_form("bilan.pdf", plain_pdf())).await;
    assert_eq!(resp.status(), 401);
    let body: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.error, "Non autorisé");
}

#[tokio::test]
async fn validation_and_decryption_errors_are_400() {
    let server = start(AnalyzerScript::Text).await;

    let resp = server
        .upload(Some(OWNER), pdf_form("notes.txt", b"hello".to_vec()))
        .await;
    assert_eq!(resp.status(), 400);
    let body: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.error, "Seuls les fichiers PDF sont acceptés");

    let form = pdf_form("bilan.pdf", plain_pdf()).text("password", "wrong");
    let resp = server.upload(Some(OWNER), form).await;
    assert_eq!(resp.status(), 400);

    let resp = server.upload(Some(OWNER), Form::new().text("password", PASSWORD)).await;
    assert_eq!(resp.status(), 400);
    let body: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(body.error, "Aucun fichier fourni");
}

#[tokio::test]
async fn quota_is_403_after_three_uploads() {
    let server = start(AnalyzerScript::Text).await;
    for _ in 0..3 {
        let resp = server
            .upload(Some(OWNER), pdf_form("bilan.pdf", plain_pdf()))
            .await;
        assert_eq!(resp.status(), 200);
    }
    let resp = server
        .upload(Some(OWNER), pdf_form("bilan.pdf", plain_pdf()))
        .await;
    assert_eq!(resp.status(), 403);
    let body: ErrorResponse = resp.json().await.unwrap();
    assert!(body.error.contains("Premium"));
}

#[tokio::test]
async fn protected_report_surfaces_the_marker() {
    let server = start(AnalyzerScript::Protected).await;
    let receipt: UploadResponse = server
        .upload(Some(OWNER), pdf_form("bilan.pdf", plain_pdf()))
        .await
        .json()
        .await
        .unwrap();

    let view: ReportView = server
        .report(OWNER, &receipt.report_id)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(view.report.status, ReportStatus::Failed);
    assert!(view.report.needs_password());
    assert!(view.results.is_empty());
}

#[tokio::test]
async fn process_endpoint_rejects_an_unknown_report() {
    let server = start(AnalyzerScript::Text).await;
    let resp = server
        .client
        .post(format!("{}/functions/process-pdf", server.base))
        .json(&serde_json::json!({ "reportId": "nope", "filePath": "user-1/nope.pdf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: ProcessResponse = resp.json().await.unwrap();
    assert!(matches!(
        body,
        ProcessResponse::Failed {
            password_required: false,
            ..
        }
    ));
}

#[tokio::test]
async fn health_answers() {
    let server = start(AnalyzerScript::Text).await;
    let resp = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}
