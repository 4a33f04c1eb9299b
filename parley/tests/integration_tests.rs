//! Integration tests for the parley CLI

use assert_cmd::Command;
use rstest::rstest;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use tempfile::TempDir;

fn parley() -> Command {
    let mut cmd = Command::cargo_bin("parley").unwrap();
    cmd.env_remove("PARLEY_API_KEY");
    cmd
}

/// 16 kHz mono WAV: `bursts` tones of 800 ms separated by 1 s of silence
fn write_speech_like(path: &Path, bursts: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for burst in 0..bursts {
        if burst > 0 {
            for _ in 0..16000 {
                writer.write_sample(0i16).unwrap();
            }
        }
        for i in 0..12800 {
            writer
                .write_sample(((i as f32 * 0.2).sin() * 12000.0) as i16)
                .unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn write_silence(path: &Path, ms: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..ms * 16 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Answers every request with the same JSON body until the test exits.
fn serve_forever(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/v1", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut request_body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut request_body);
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = reader.into_inner().write_all(response.as_bytes());
        }
    });
    endpoint
}

fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    format!("http://{}/v1", listener.local_addr().unwrap())
}

/// Test CLI help lists the splitting options
#[test]
fn test_cli_help() {
    let assert = parley()
        .arg("--help")
        .assert()
        .success();
    assert!(stdout(&assert).contains("--silence-length"));
}

/// Test CLI version
#[test]
fn test_cli_version() {
    parley().arg("--version").assert().success();
}

/// Test missing audio file error
#[test]
fn test_missing_audio_file() {
    let output = parley().arg("nonexistent_file.wav").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

/// Test invalid arguments
#[rstest]
#[case(&["--invalid-flag"])]
#[case(&["-m", "many", "in.wav"])]
#[case(&["--engine", "google", "in.wav"])]
fn test_invalid_arguments(#[case] args: &[&str]) {
    parley().args(args).assert().failure();
}

/// Test a negative dBFS threshold parses as a value
#[test]
fn test_negative_threshold_is_a_value() {
    let output = parley()
        .args(["-t", "-35", "nonexistent_file.wav"])
        .output()
        .unwrap();
    // Reaches the file check instead of failing to parse
    assert_eq!(output.status.code(), Some(1));
}

/// Test the http engine refuses to run without an endpoint
#[test]
fn test_http_engine_requires_endpoint() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("talk.wav");
    write_speech_like(&input, 1);

    let output = parley()
        .current_dir(temp.path())
        .args(["--engine", "http", "-s"])
        .arg(&input)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("endpoint"));
    assert!(!temp.path().join("talk.txt").exists());
}

/// Test a full run against a local transcription service
#[rstest]
#[case(r#"{"text":"hello"}"#)]
#[case(r#"{"text":"hello."}"#)]
fn test_transcribes_with_http_engine(#[case] reply: &'static str) {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("talk.wav");
    write_speech_like(&input, 2);
    let endpoint = serve_forever(reply);

    parley()
        .current_dir(temp.path())
        .args(["--engine", "http", "--endpoint", &endpoint, "-m", "2", "-s"])
        .arg(&input)
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(temp.path().join("talk.txt")).unwrap(),
        "hello.\nhello.\n"
    );
    let residue = fs::read_dir(temp.path().join("tmp")).unwrap().count();
    assert_eq!(residue, 0);
}

/// Test a service failure exits non-zero without a transcript
#[test]
fn test_service_failure_writes_no_transcript() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("talk.wav");
    let output_path = temp.path().join("out.txt");
    write_speech_like(&input, 2);

    let output = parley()
        .current_dir(temp.path())
        .args(["--engine", "http", "--endpoint", &closed_endpoint(), "-s"])
        .arg(&input)
        .arg(&output_path)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!output_path.exists());
}

/// Test all-silent input produces an empty transcript
#[test]
fn test_all_silent_input_gives_empty_file() {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("quiet.wav");
    write_silence(&input, 2000);

    let assert = parley()
        .current_dir(temp.path())
        .args(["--engine", "http", "--endpoint", &closed_endpoint()])
        .arg(&input)
        .assert()
        .success();

    assert!(stdout(&assert).contains("Done in"));

    assert_eq!(fs::read_to_string(temp.path().join("quiet.txt")).unwrap(), "");
}

/// Test listing downloadable models
#[test]
fn test_models_list_available() {
    let assert = parley()
        .args(["models", "list", "--available"])
        .assert()
        .success();
    assert!(stdout(&assert).contains("base.en"));
}

/// Test downloading an unknown model fails
#[test]
fn test_models_download_unknown() {
    parley()
        .args(["models", "download", "gigantic"])
        .assert()
        .failure();
}

fn stdout(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}
