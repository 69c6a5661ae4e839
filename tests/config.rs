//! Configuration loading tests

use std::collections::HashMap;
use std::path::PathBuf;

use parley::config::file::{ParleyConfigFile, parse_config, read_config_file};
use parley::{Config, Error};

const SAMPLE: &str = r#"
[segmenter]
sample_rate = 32000
frame_duration_ms = 20
padding_duration_ms = 400
vad_mode = 1
trigger_ratio = 0.8
release_ratio = 0.6

[playback]
chunk_size = 2048
stop_timeout_ms = 500

[output]
segments_dir = "/tmp/parley-segments"
"#;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_file_values_applied() {
    let fc = parse_config(SAMPLE).unwrap();
    let config = Config::resolve(fc, env_from(&[])).unwrap();

    assert_eq!(config.segmenter.sample_rate, 32000);
    assert_eq!(config.segmenter.frame_duration_ms, 20);
    assert_eq!(config.segmenter.padding_frames(), 20);
    assert_eq!(config.segmenter.vad_mode, 1);
    assert!((config.segmenter.trigger_ratio - 0.8).abs() < f32::EPSILON);
    assert!((config.segmenter.release_ratio - 0.6).abs() < f32::EPSILON);
    assert_eq!(config.playback.chunk_size, 2048);
    assert_eq!(config.playback.stop_timeout_ms, 500);
    assert_eq!(config.playback.sample_rate, 24000);
    assert_eq!(config.segments_dir, PathBuf::from("/tmp/parley-segments"));
}

#[test]
fn test_env_overrides_file() {
    let fc = parse_config(SAMPLE).unwrap();
    let env = env_from(&[
        ("PARLEY_SAMPLE_RATE", "16000"),
        ("PARLEY_CHUNK_SIZE", "512"),
        ("PARLEY_SEGMENTS_DIR", "/var/tmp/segments"),
    ]);
    let config = Config::resolve(fc, env).unwrap();

    assert_eq!(config.segmenter.sample_rate, 16000);
    assert_eq!(config.segmenter.frame_duration_ms, 20);
    assert_eq!(config.playback.chunk_size, 512);
    assert_eq!(config.segments_dir, PathBuf::from("/var/tmp/segments"));
}

#[test]
fn test_empty_file_uses_defaults() {
    let fc = parse_config("").unwrap();
    let config = Config::resolve(fc, env_from(&[])).unwrap();
    assert_eq!(config.segmenter.sample_rate, 16000);
    assert_eq!(config.segmenter.frame_duration_ms, 30);
    assert_eq!(config.segmenter.padding_duration_ms, 300);
    assert_eq!(config.playback.chunk_size, 1024);
}

#[test]
fn test_unknown_keys_rejected() {
    assert!(matches!(
        parse_config("[segmenter]\nframe_ms = 30\n"),
        Err(Error::Toml(_))
    ));
}

#[test]
fn test_invalid_window_rejected() {
    let fc = parse_config("[segmenter]\npadding_duration_ms = 0\n").unwrap();
    assert!(matches!(
        Config::resolve(fc, env_from(&[])),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_read_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let fc = read_config_file(&path).unwrap();
    let config = Config::resolve(fc, env_from(&[])).unwrap();
    assert_eq!(config.playback.chunk_size, 2048);

    let missing = dir.path().join("missing.toml");
    assert!(matches!(read_config_file(&missing), Err(Error::Io(_))));
}

#[test]
fn test_default_file_struct() {
    let config = Config::resolve(ParleyConfigFile::default(), env_from(&[])).unwrap();
    assert!(config.validate().is_ok());
}
