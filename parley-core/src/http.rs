//! Remote speech recognition over an OpenAI-compatible HTTP API

use crate::audio::{exceeds_ambient_noise, AudioSegment};
use crate::config::HttpOptions;
use crate::error::{ParleyError, Result};
use crate::transcriber::{normalize_text, primary_language, strip_final_period, Transcriber};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Posts each segment as a WAV upload to `{endpoint}/audio/transcriptions`.
///
/// Uses the blocking client, so it must be built and called outside of an
/// async context. The pipeline's worker threads satisfy that.
pub struct HttpTranscriber {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriber {
    pub fn new(options: &HttpOptions) -> Result<Self> {
        let endpoint = options.endpoint.as_deref().ok_or_else(|| {
            ParleyError::Configuration("the http engine needs an endpoint".to_string())
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| ParleyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/audio/transcriptions", endpoint.trim_end_matches('/')),
            api_key: options.api_key.clone(),
            model: options.model.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(
        &self,
        audio: &AudioSegment,
        language: &str,
        adjust_for_noise: bool,
    ) -> Result<Option<String>> {
        if adjust_for_noise && !exceeds_ambient_noise(audio.samples(), audio.sample_rate()) {
            debug!("Segment {} is no louder than its ambient noise", audio.index());
            return Ok(None);
        }

        let part = multipart::Part::bytes(audio.to_wav_bytes()?)
            .file_name(format!("segment-{:08}.wav", audio.index()))
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", primary_language(language))
            .text("response_format", "json");

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| ParleyError::TranscriptionService(format!("Request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ParleyError::TranscriptionService(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let body: TranscriptionResponse = response.json().map_err(|e| {
            ParleyError::TranscriptionService(format!("Unexpected response: {}", e))
        })?;
        Ok(normalize_text(&body.text).map(strip_final_period))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use pretty_assertions::assert_eq;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Serves one request with a canned response and hands back the request head.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/v1", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                head.push_str(&line);
            }
            let lower = head.to_ascii_lowercase();
            if let Some(len) = lower
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
            {
                let mut body = vec![0u8; len];
                reader.read_exact(&mut body).unwrap();
            } else if lower.contains("transfer-encoding: chunked") {
                loop {
                    let mut size = String::new();
                    reader.read_line(&mut size).unwrap();
                    let size = usize::from_str_radix(size.trim(), 16).unwrap();
                    let mut chunk = vec![0u8; size + 2];
                    reader.read_exact(&mut chunk).unwrap();
                    if size == 0 {
                        break;
                    }
                }
            }
            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).unwrap();
            head
        });
        (endpoint, handle)
    }

    fn options(endpoint: String) -> HttpOptions {
        HttpOptions {
            endpoint: Some(endpoint),
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn segment() -> AudioSegment {
        AudioSegment::new(3, vec![0.2; 8000], SAMPLE_RATE)
    }

    #[test]
    fn test_recognized_text() {
        let (endpoint, server) = serve_once("200 OK", r#"{"text":" hello there "}"#);
        let transcriber = HttpTranscriber::new(&options(endpoint)).unwrap();

        let text = transcriber.transcribe(&segment(), "en-US", false).unwrap();

        assert_eq!(text.as_deref(), Some("hello there"));
        let head = server.join().unwrap();
        assert!(head.starts_with("POST /v1/audio/transcriptions"));
        assert!(head.to_ascii_lowercase().contains("authorization: bearer test-key"));
    }

    #[test]
    fn test_closing_period_is_left_to_the_transcript() {
        let (endpoint, server) = serve_once("200 OK", r#"{"text":"Hello there."}"#);
        let transcriber = HttpTranscriber::new(&options(endpoint)).unwrap();

        let text = transcriber.transcribe(&segment(), "en-US", false).unwrap();

        assert_eq!(text.as_deref(), Some("Hello there"));
        server.join().unwrap();
    }

    #[test]
    fn test_empty_text_is_no_speech() {
        let (endpoint, server) = serve_once("200 OK", r#"{"text":""}"#);
        let transcriber = HttpTranscriber::new(&options(endpoint)).unwrap();

        assert_eq!(transcriber.transcribe(&segment(), "en-US", false).unwrap(), None);
        server.join().unwrap();
    }

    #[test]
    fn test_server_error_is_service_failure() {
        let (endpoint, server) = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#);
        let transcriber = HttpTranscriber::new(&options(endpoint)).unwrap();

        let err = transcriber.transcribe(&segment(), "en-US", false).unwrap_err();

        assert!(err.is_service_failure());
        assert!(err.to_string().contains("500"));
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint_is_service_failure() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let transcriber =
            HttpTranscriber::new(&options(format!("http://127.0.0.1:{}/v1", port))).unwrap();

        let err = transcriber.transcribe(&segment(), "en-US", false).unwrap_err();
        assert!(err.is_service_failure());
    }

    #[test]
    fn test_quiet_segment_skips_request_with_noise_adaptation() {
        // Nothing listens here; a request would fail
        let transcriber = HttpTranscriber::new(&options("http://127.0.0.1:9/v1".into())).unwrap();
        let flat = AudioSegment::new(0, vec![0.01; 32000], SAMPLE_RATE);

        assert_eq!(transcriber.transcribe(&flat, "en-US", true).unwrap(), None);
    }

    #[test]
    fn test_requires_endpoint() {
        let err = HttpTranscriber::new(&HttpOptions::default()).err().unwrap();
        assert!(matches!(err, ParleyError::Configuration(_)));
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let transcriber =
            HttpTranscriber::new(&options("http://localhost:8000/v1/".into())).unwrap();
        assert_eq!(transcriber.url(), "http://localhost:8000/v1/audio/transcriptions");
    }
}
