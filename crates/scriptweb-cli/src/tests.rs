// Copyright 2025 Scriptweb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::*;
use std::io::Write;

#[test]
fn test_cli_parse_run_defaults() {
    let cli = Cli::from_args(&["scriptweb"], &["run", "-s", "app.js"]).unwrap();
    match cli.command {
        Commands::Run(RunArgs {
            script,
            config,
            request_header_capacity,
            response_header_capacity,
        }) => {
            assert_eq!(script, "app.js");
            assert!(config.is_none());
            assert!(request_header_capacity.is_none());
            assert!(response_header_capacity.is_none());
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_cli_parse_run_with_options() {
    let cli = Cli::from_args(
        &["scriptweb"],
        &[
            "run",
            "--script",
            "app.js",
            "--config",
            "scriptweb.json",
            "--request-header-capacity",
            "20",
            "--response-header-capacity",
            "4",
        ],
    )
    .unwrap();
    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.config.as_deref(), Some("scriptweb.json"));
            assert_eq!(args.request_header_capacity, Some(20));
            assert_eq!(args.response_header_capacity, Some(4));
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_cli_parse_check() {
    let cli = Cli::from_args(&["scriptweb"], &["check", "-s", "app.js"]).unwrap();
    assert!(matches!(cli.command, Commands::Check(CheckArgs { ref script, .. }) if script == "app.js"));
}

#[test]
fn test_cli_run_requires_script() {
    assert!(Cli::from_args(&["scriptweb"], &["run"]).is_err());
}

#[test]
fn test_cli_rejects_non_numeric_capacity() {
    assert!(Cli::from_args(
        &["scriptweb"],
        &["run", "-s", "app.js", "--request-header-capacity", "many"]
    )
    .is_err());
}

#[test]
fn test_build_config_overrides() {
    let config = build_config(None, Some(20), Some(4)).unwrap();
    assert_eq!(config.request_header_capacity, 20);
    assert_eq!(config.response_header_capacity, 4);
    assert_eq!(config.max_header_field_len, BridgeConfig::default().max_header_field_len);
}

#[test]
fn test_build_config_rejects_zero_capacity() {
    assert!(build_config(None, Some(0), None).is_err());
}

#[test]
fn test_build_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"request_header_capacity": 8, "read_timeout": 2.5}}"#).unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = build_config(Some(&path), None, Some(3)).unwrap();
    assert_eq!(config.request_header_capacity, 8);
    assert_eq!(config.response_header_capacity, 3);
    assert_eq!(config.read_timeout, std::time::Duration::from_millis(2500));
}

#[test]
fn test_build_config_missing_file() {
    let err = build_config(Some("/nonexistent/scriptweb.json"), None, None).unwrap_err();
    assert!(err.to_string().contains("Failed to load config"));
}

fn script_file(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", source).unwrap();
    file
}

#[tokio::test]
async fn test_load_and_shut_down_on_single_thread_runtime() {
    let file = script_file(
        "var id = webserver.startWebserver('127.0.0.1:0')[0];\n\
         webserver.serve(id, '/', function(req) { return [200, 'up', {}]; });",
    );

    let ctx = load(BridgeConfig::default(), file.path().display().to_string())
        .await
        .unwrap();
    assert_eq!(ctx.servers().server_ids().len(), 1);

    shut_down(ctx).await.unwrap();
}

#[tokio::test]
async fn test_check_reports_script_errors() {
    let file = script_file("this is not javascript (");
    let args = CheckArgs {
        script: file.path().display().to_string(),
        config: None,
    };
    assert!(check(args).await.is_err());

    let file = script_file("var x = 1 + 1;");
    let args = CheckArgs {
        script: file.path().display().to_string(),
        config: None,
    };
    check(args).await.unwrap();
}

#[tokio::test]
async fn test_load_missing_script() {
    let err = load(BridgeConfig::default(), "/nonexistent/app.js".to_string())
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("Failed to load script"));
}
