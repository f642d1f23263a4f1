#![cfg(test)]

use std::path::PathBuf;

use crate::config::{ConfigError, LoaderConfig};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::error::TransportError;
use crate::plugin_system::generation::AbiGeneration;

fn load_from(path: &str) -> Result<LoaderConfig> {
    let parsed: std::result::Result<LoaderConfig, ConfigError> =
        Err(ConfigError::UnsupportedFormat { path: PathBuf::from(path) });
    Ok(parsed?)
}

fn make_vdevice() -> Result<i32> {
    let outcome: std::result::Result<i32, TransportError> =
        Err(TransportError::Unsupported { operation: "make_vdevice", generation: AbiGeneration::V8 });
    Ok(outcome?)
}

#[test]
fn test_subsystem_errors_convert_with_question_mark() {
    let err = load_from("loader.ini").unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::UnsupportedFormat { .. })));
    assert_eq!(
        err.to_string(),
        "Configuration error: Unsupported configuration format for loader.ini"
    );

    let err = make_vdevice().unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Unsupported { .. })));
    assert_eq!(
        err.to_string(),
        "Transport error: Operation 'make_vdevice' is not supported by ABI v8"
    );
}
