//! Unit tests for CLI commands

use crate::cli::{status_json, Cli, Commands};
use clap::Parser;
use std::io::Write;

#[test]
fn test_serve_command_parses() {
    let cli = Cli::try_parse_from(["whiteboard", "serve", "--config", "wb.yaml", "--watch"]).unwrap();
    match cli.command {
        Commands::Serve { config, watch } => {
            assert_eq!(config.to_string_lossy(), "wb.yaml");
            assert!(watch);
        }
        Commands::Status { .. } => panic!("Expected Serve command"),
    }
}

#[test]
fn test_status_command_parses() {
    let cli = Cli::try_parse_from(["whiteboard", "status", "-c", "wb.yaml"]).unwrap();
    match cli.command {
        Commands::Status { config, compact } => {
            assert_eq!(config.to_string_lossy(), "wb.yaml");
            assert!(!compact);
        }
        Commands::Serve { .. } => panic!("Expected Status command"),
    }
}

#[test]
fn test_unknown_command_rejected() {
    assert!(Cli::try_parse_from(["whiteboard", "generate"]).is_err());
}

#[test]
fn test_status_json_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
name: cli
port: 8080
providers:
  - id: 1
    properties:
      whiteboard.name: shop
      whiteboard.application.base: /shop
  - id: 2
    properties:
      whiteboard.name: shop
      whiteboard.application.base: /other
"#
    )
    .unwrap();
    let json = status_json(file.path(), true).unwrap();
    let status: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(status["application_dtos"][0]["name"], "shop");
    assert_eq!(status["application_dtos"][0]["base"], "/shop/*");
    assert_eq!(status["failed_application_dtos"][0]["failure_code"], 3);
}
