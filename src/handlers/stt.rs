//! # Speech-to-Text Endpoint
//!
//! `POST /stt` with a multipart form whose `file` field holds audio in any
//! format the transcoder can read.
//!
//! ## Pipeline (strictly linear):
//! ```text
//! ingress -> transcoder -> recognizer -> response
//!                                 \-> cleanup (always, before the response)
//! ```
//!
//! ## Responses:
//! - `200` `{"text": "...", "status": "success"}`
//! - `400` `{"error": "No file uploaded"}`
//! - `400` `{"error": "Audio conversion failed"}`
//! - `413` `{"error": "File too large"}`
//! - `500` `{"error": "Speech recognition failed", "details": "..."}`

use crate::audio::RequestWorkspace;
use crate::error::SttError;
use crate::middleware::RequestId;
use crate::state::AppState;
use crate::transcription::{transcribe_file, RecognitionOptions};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the multipart field carrying the audio.
const FILE_FIELD: &str = "file";

/// Successful transcription body.
#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub text: String,
    pub status: &'static str,
}

/// Transcribe an uploaded audio file.
///
/// ## Endpoint: `POST /stt`
///
/// ## Cleanup Guarantee:
/// Both temporary files are removed before the response is returned, on
/// every path. Removal problems are only logged, so they never replace the
/// real outcome of the request.
pub async fn speech_to_text(
    req: HttpRequest,
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, SttError> {
    let start_time = Instant::now();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0)
        .unwrap_or_else(Uuid::new_v4);

    let mut workspace = RequestWorkspace::new(&state.config.storage.temp_path(), request_id);
    let result = run_pipeline(&state, &mut payload, &workspace).await;
    workspace.cleanup();

    match result {
        Ok(text) => {
            info!(
                request_id = %request_id,
                chars = text.len(),
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Speech-to-text request succeeded"
            );
            Ok(HttpResponse::Ok().json(SttResponse {
                text,
                status: "success",
            }))
        }
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "Speech-to-text request failed");
            Err(err)
        }
    }
}

/// ingress -> transcoder -> recognizer. Cleanup is the caller's job.
async fn run_pipeline(
    state: &AppState,
    payload: &mut Multipart,
    workspace: &RequestWorkspace,
) -> Result<String, SttError> {
    let limit = state.config.server.max_upload_bytes;
    let upload_bytes = save_upload(payload, workspace.upload_path(), limit).await?;
    debug!(
        request_id = %workspace.request_id(),
        bytes = upload_bytes,
        "Upload saved"
    );

    if !state
        .transcoder
        .convert(workspace.upload_path(), workspace.canonical_path())
        .await
    {
        return Err(SttError::ConversionFailed);
    }

    let active = state.begin_transcription();
    let model = state.model.clone();
    let canonical = workspace.canonical_path().to_path_buf();
    let options = RecognitionOptions::from(&state.config.recognition);

    let text = web::block(move || transcribe_file(model.as_ref(), &canonical, &options))
        .await
        .map_err(|e| SttError::RecognitionFailed(format!("Recognition worker failed: {}", e)))??;

    active.complete();
    Ok(text)
}

/// Stream the first `file` field to `path`, returning the byte count.
///
/// A field only counts as the upload when it carries a filename, which is
/// what browsers and `curl -F file=@clip.ogg` send. Any form that cannot be
/// parsed as multipart is treated the same as a form without the field.
async fn save_upload(
    payload: &mut Multipart,
    path: &Path,
    limit: usize,
) -> Result<usize, SttError> {
    while let Some(item) = payload.next().await {
        let field = item.map_err(|e| {
            debug!("Multipart error: {}", e);
            SttError::NoFileUploaded
        })?;

        if is_upload_field(&field) {
            return write_field(field, path, limit).await;
        }
    }

    Err(SttError::NoFileUploaded)
}

fn is_upload_field(field: &Field) -> bool {
    field
        .content_disposition()
        .map(|cd| cd.get_name() == Some(FILE_FIELD) && cd.get_filename().is_some())
        .unwrap_or(false)
}

async fn write_field(mut field: Field, path: &Path, limit: usize) -> Result<usize, SttError> {
    let io_error = |e: std::io::Error| {
        SttError::RecognitionFailed(format!("Failed to save upload: {}", e))
    };

    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    let mut written = 0usize;

    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            SttError::RecognitionFailed(format!("Failed to read upload: {}", e))
        })?;

        written += chunk.len();
        if written > limit {
            return Err(SttError::FileTooLarge { limit });
        }
        file.write_all(&chunk).await.map_err(io_error)?;
    }

    file.flush().await.map_err(io_error)?;
    Ok(written)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::canonical::fixtures::wav_bytes;
    use crate::audio::transcoder::fixtures;
    use crate::config::AppConfig;
    use crate::middleware::RequestLogging;
    use crate::transcription::testing::ScriptedModel;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const BOUNDARY: &str = "----stt-test-boundary";

    fn multipart_body(field: &str, filename: Option<&str>, content: &[u8]) -> Vec<u8> {
        let disposition = match filename {
            Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
            None => format!("form-data; name=\"{}\"", field),
        };
        let mut body = format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/stt")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    struct Harness {
        state: AppState,
        model: Arc<ScriptedModel>,
        temp: tempfile::TempDir,
        _bin: tempfile::TempDir,
    }

    /// State whose transcoder is a shell script and whose model is scripted.
    fn harness(transcoder: fn(&Path) -> std::path::PathBuf, max_upload_bytes: usize) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();

        let mut config = AppConfig::default();
        config.transcoder.program = transcoder(bin.path()).to_string_lossy().into_owned();
        config.transcoder.timeout_secs = 10;
        config.storage.temp_dir = temp.path().to_string_lossy().into_owned();
        config.server.max_upload_bytes = max_upload_bytes;

        let model = Arc::new(ScriptedModel::new(8000));
        let state = AppState::new(config, model.clone());
        Harness {
            state,
            model,
            temp,
            _bin: bin,
        }
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .wrap(RequestLogging)
                    .route("/stt", web::post().to(speech_to_text)),
            )
            .await
        };
    }

    fn temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[actix_web::test]
    async fn test_missing_file_field() {
        let h = harness(fixtures::passthrough, 1024 * 1024);
        let app = app!(h.state);

        let req = upload_request(multipart_body("audio", Some("clip.wav"), b"data")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({"error": "No file uploaded"}));

        assert_eq!(temp_files(h.temp.path()), 0);
        assert_eq!(h.model.sessions_created.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_file_field_without_filename_is_not_an_upload() {
        let h = harness(fixtures::passthrough, 1024 * 1024);
        let app = app!(h.state);

        let req = upload_request(multipart_body("file", None, b"data")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_non_multipart_body() {
        let h = harness(fixtures::passthrough, 1024 * 1024);
        let app = app!(h.state);

        let req = test::TestRequest::post()
            .uri("/stt")
            .insert_header(("content-type", "application/json"))
            .set_payload("{}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file uploaded");
    }

    #[actix_web::test]
    async fn test_conversion_failure() {
        let h = harness(fixtures::failing, 1024 * 1024);
        let app = app!(h.state);

        let req = upload_request(multipart_body("file", Some("clip.ogg"), b"not audio")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({"error": "Audio conversion failed"}));

        assert_eq!(temp_files(h.temp.path()), 0);
        assert_eq!(h.model.sessions_created.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_successful_transcription() {
        let h = harness(fixtures::passthrough, 1024 * 1024);
        let app = app!(h.state);

        // one boundary at 8000 frames, 1000 frames left for the final flush
        let wav = wav_bytes(1, 9000);
        let req = upload_request(multipart_body("file", Some("clip.wav"), &wav)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["text"], "segment 1 tail");

        assert_eq!(temp_files(h.temp.path()), 0);
        assert_eq!(h.model.finals.load(Ordering::SeqCst), 1);

        let metrics = h.state.get_metrics_snapshot();
        assert_eq!(metrics.completed_transcriptions, 1);
        assert_eq!(metrics.active_transcriptions, 0);
    }

    #[actix_web::test]
    async fn test_same_upload_twice_gives_same_text() {
        let h = harness(fixtures::passthrough, 1024 * 1024);
        let app = app!(h.state);
        let wav = wav_bytes(1, 20_000);

        let mut texts = Vec::new();
        for _ in 0..2 {
            let req = upload_request(multipart_body("file", Some("clip.wav"), &wav)).to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            texts.push(body["text"].as_str().unwrap().to_string());
        }
        assert_eq!(texts[0], texts[1]);
        assert_eq!(texts[0], "segment 1 segment 2 tail");
    }

    #[actix_web::test]
    async fn test_stereo_canonical_audio_is_a_server_error() {
        let h = harness(fixtures::passthrough, 1024 * 1024);
        let app = app!(h.state);

        let wav = wav_bytes(2, 4000);
        let req = upload_request(multipart_body("file", Some("stereo.wav"), &wav)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Speech recognition failed");
        assert!(body["details"]
            .as_str()
            .unwrap()
            .starts_with("Audio file must be WAV format mono PCM"));

        assert_eq!(temp_files(h.temp.path()), 0);
        assert_eq!(h.state.get_metrics_snapshot().active_transcriptions, 0);
    }

    #[actix_web::test]
    async fn test_upload_over_limit() {
        let h = harness(fixtures::passthrough, 16);
        let app = app!(h.state);

        let req = upload_request(multipart_body("file", Some("big.wav"), &[0u8; 64])).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "File too large");

        assert_eq!(temp_files(h.temp.path()), 0);
    }
}
