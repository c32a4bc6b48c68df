//! Environment-based configuration overrides

use flowgate::EngineConfig;
use serial_test::serial;
use std::time::Duration;

fn clear_flowgate_env() {
    for key in [
        "FLOWGATE_DEFAULT_TIMEOUT",
        "FLOWGATE_FS_ROOT",
        "FLOWGATE_OFFLINE",
        "FLOWGATE_PYTHON_BIN",
        "FLOWGATE_LLM_BASE_URL",
        "FLOWGATE_LLM_BACKEND",
        "FLOWGATE_TTS_COMMAND",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn env_overrides_are_applied() {
    clear_flowgate_env();
    std::env::set_var("FLOWGATE_DEFAULT_TIMEOUT", "90s");
    std::env::set_var("FLOWGATE_OFFLINE", "true");
    std::env::set_var("FLOWGATE_PYTHON_BIN", "/usr/bin/python3.12");
    std::env::set_var("FLOWGATE_LLM_BACKEND", "vllm");

    let config = EngineConfig::load_from_env().unwrap();
    assert_eq!(config.default_timeout(), Duration::from_secs(90));
    assert!(config.offline);
    assert_eq!(config.python_bin, "/usr/bin/python3.12");
    assert_eq!(config.llm_backend, "vllm");

    clear_flowgate_env();
}

#[test]
#[serial]
fn invalid_timeout_override_falls_back_to_default() {
    clear_flowgate_env();
    std::env::set_var("FLOWGATE_DEFAULT_TIMEOUT", "eventually");

    let config = EngineConfig::load_from_env().unwrap();
    assert_eq!(config.default_timeout(), Duration::from_secs(60));

    clear_flowgate_env();
}

#[test]
#[serial]
fn defaults_load_without_environment() {
    clear_flowgate_env();
    let config = EngineConfig::load_from_env().unwrap();
    assert_eq!(config.default_timeout(), Duration::from_secs(60));
    assert!(!config.offline);
    assert_eq!(config.python_bin, "python3");
}
