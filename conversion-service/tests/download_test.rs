mod common;

use common::{build_docx, sheet_names, TestApp};
use reqwest::StatusCode;

#[tokio::test]
async fn download_before_completion_is_conflict() {
    let app = TestApp::spawn_with(|c| c.worker.enabled = false).await;
    let id = app.upload_docx("report.docx", build_docx(&["x"], &[])).await;

    let response = app
        .client
        .get(app.url(&format!("/api/v1/documents/{}/download", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["error"],
        "Document is not ready for download (status: pending)"
    );

    app.cleanup().await;
}

#[tokio::test]
async fn download_unknown_document_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(app.url("/api/v1/documents/nope/download"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await;
}

#[tokio::test]
async fn download_serves_xlsx_named_after_the_upload() {
    let app = TestApp::spawn().await;
    let id = app
        .upload_docx("Quarterly Report.docx", build_docx(&["Revenue"], &[]))
        .await;

    let document = app.wait_terminal(&id).await;
    assert_eq!(document["status"], "completed");

    let response = app
        .client
        .get(app.url(&format!("/api/v1/documents/{}/download", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"Quarterly Report.xlsx\"; filename*=UTF-8''Quarterly%20Report.xlsx"
    );

    let bytes = response.bytes().await.unwrap();
    assert_eq!(sheet_names(&bytes), vec!["Paragraphs"]);

    app.cleanup().await;
}

#[tokio::test]
async fn download_of_failed_document_is_conflict() {
    let app = TestApp::spawn().await;
    let id = app
        .upload_docx("broken.docx", b"not a zip archive".to_vec())
        .await;

    let document = app.wait_terminal(&id).await;
    assert_eq!(document["status"], "failed");

    let response = app
        .client
        .get(app.url(&format!("/api/v1/documents/{}/download", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await;
}
