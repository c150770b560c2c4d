#![allow(dead_code)]

use conversion_service::config::{ConversionConfig, RegistryBackend};
use conversion_service::startup::Application;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::multipart;
use std::io::{Cursor, Read, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub storage_path: String,
    pub client: reqwest::Client,
    shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Start the service on a random port with an in-memory registry and a
    /// throwaway storage directory. `configure` runs last.
    pub async fn spawn_with(configure: impl FnOnce(&mut ConversionConfig)) -> Self {
        let storage_path = format!("target/test-storage-{}", Uuid::new_v4());

        let mut config = ConversionConfig::load().expect("Failed to load configuration");
        config.common.port = 0; // Random port for testing
        config.registry.backend = RegistryBackend::Memory;
        config.storage.local_path = storage_path.clone();
        config.worker.enabled = true;
        config.worker.worker_count = 2;
        config.worker.queue_size = 16;
        config.worker.conversion_timeout_secs = 30;
        config.upload.max_bytes = 1024 * 1024;
        config.upload.allowed_extensions = vec!["docx".to_string()];
        configure(&mut config);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let shutdown = app.shutdown_token();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            storage_path,
            client,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn upload(&self, filename: &str, mime: &str, data: Vec<u8>) -> reqwest::Response {
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(data)
                .file_name(filename.to_string())
                .mime_str(mime)
                .unwrap(),
        );
        self.client
            .post(self.url("/api/v1/documents"))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute upload request")
    }

    /// Upload a DOCX and return the created document id.
    pub async fn upload_docx(&self, filename: &str, data: Vec<u8>) -> String {
        let response = self.upload(filename, DOCX_MIME, data).await;
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: serde_json::Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn get_document(&self, id: &str) -> serde_json::Value {
        self.client
            .get(self.url(&format!("/api/v1/documents/{}", id)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll until the document reaches completed or failed.
    pub async fn wait_terminal(&self, id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let document = self.get_document(id).await;
            match document["status"].as_str() {
                Some("completed") | Some("failed") => return document,
                _ => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
        panic!("document {} did not reach a terminal status", id);
    }

    pub async fn cleanup(&self) {
        self.shutdown.cancel();
        let _ = tokio::fs::remove_dir_all(&self.storage_path).await;
    }
}

/// Minimal DOCX: one body with the given paragraphs followed by one table per
/// entry in `tables`.
pub fn build_docx(paragraphs: &[&str], tables: &[Vec<Vec<&str>>]) -> Vec<u8> {
    let mut body = String::new();
    for text in paragraphs {
        body.push_str(&format!(
            r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            quick_xml::escape::escape(*text)
        ));
    }
    for table in tables {
        body.push_str("<w:tbl>");
        for row in table {
            body.push_str("<w:tr>");
            for cell in row {
                body.push_str(&format!(
                    "<w:tc><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:tc>",
                    quick_xml::escape::escape(*cell)
                ));
            }
            body.push_str("</w:tr>");
        }
        body.push_str("</w:tbl>");
    }

    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(document.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

/// Names of the worksheets in workbook order.
pub fn sheet_names(xlsx: &[u8]) -> Vec<String> {
    let workbook = read_part(xlsx, "xl/workbook.xml");
    let mut reader = Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    let mut names = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).unwrap() {
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"name" {
                        names.push(attr.unescape_value().unwrap().into_owned());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    names
}

/// Cell texts of worksheet `index` (1-based), row by row.
pub fn sheet_rows(xlsx: &[u8], index: usize) -> Vec<Vec<String>> {
    let sheet = read_part(xlsx, &format!("xl/worksheets/sheet{}.xml", index));
    let mut reader = Reader::from_reader(sheet.as_slice());
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(e) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                in_text = true;
                if let Some(row) = rows.last_mut() {
                    row.push(String::new());
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"t" => in_text = false,
            Event::Text(e) if in_text => {
                if let Some(cell) = rows.last_mut().and_then(|row| row.last_mut()) {
                    cell.push_str(&e.decode().unwrap());
                }
            }
            Event::GeneralRef(e) if in_text => {
                let text = match e.resolve_char_ref().unwrap() {
                    Some(c) => c.to_string(),
                    None => quick_xml::escape::resolve_predefined_entity(&e.decode().unwrap())
                        .unwrap_or_default()
                        .to_string(),
                };
                if let Some(cell) = rows.last_mut().and_then(|row| row.last_mut()) {
                    cell.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    rows
}

fn read_part(archive: &[u8], name: &str) -> Vec<u8> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).expect("not a zip archive");
    let mut file = zip.by_name(name).expect("missing archive part");
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    data
}
