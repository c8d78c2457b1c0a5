//! End-to-end tests over the real reqwest transport against a local mock server.

use std::io::{Read, Seek, SeekFrom};

use httpmock::prelude::*;
use serde_json::json;

use compredict_client::{Client, ClientConfig, Error, FileType, RunOptions, TaskStatus, TrainOptions};

const KEY: &str = "0123456789abcdef0123456789abcdef01234567";

fn client_for(server: &MockServer) -> Client {
    let config = ClientConfig {
        api_base: server.url("/api/"),
        ..ClientConfig::with_api_key(KEY)
    };
    Client::new(config).unwrap()
}

#[test]
fn test_run_algorithm_returns_decoded_body() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/algorithms/56/predict")
            .header("Authorization", format!("Token {}", KEY))
            .body_includes(r#""callback_url":"1callback|2callback""#);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"error": "False", "result": "some result"}));
    });

    let mut client = client_for(&server);
    let opts = RunOptions {
        callback_url: Some(vec!["1callback", "2callback"].into()),
        ..RunOptions::default()
    };
    let submission = client
        .run_algorithm("56", json!({"data": "some_data"}), &opts)
        .unwrap()
        .unwrap();

    mock.assert();
    let prediction = submission.prediction().unwrap();
    assert_eq!(prediction.error, "False");
    assert_eq!(prediction.result, "some result");
}

#[test]
fn test_bad_request_raises_or_records() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/algorithms/56/predict");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({"error": "True", "error_msg": "Bad request"}));
    });

    let mut client = client_for(&server);

    client.set_fail_on_error(true);
    let err = client.run_algorithm("56", json!({}), &RunOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Client(_)));
    assert_eq!(err.to_string(), "Bad request");

    client.set_fail_on_error(false);
    let result = client.run_algorithm("56", json!({}), &RunOptions::default()).unwrap();
    assert!(result.is_none());
    let recorded = client.last_error().unwrap();
    assert_eq!(recorded.to_string(), "Bad request");
    assert_eq!(recorded.status_code(), Some(400));
}

#[test]
fn test_html_error_page_message_is_extracted() {
    let server = MockServer::start();
    let page = "<html><body><pre>Exception Value: division by zero\nRequest information</pre></body></html>";
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/algorithms/tasks/t1");
        then.status(500).header("content-type", "text/html").body(page);
    });

    let mut client = client_for(&server);
    client.set_fail_on_error(true);
    let err = client.get_task_results("t1").unwrap_err();
    assert!(matches!(err, Error::Server(_)));
    assert_eq!(err.to_string(), "division by zero");
}

#[test]
fn test_graph_download_is_rewound_artifact() {
    let server = MockServer::start();
    let png: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/algorithms/56/graph")
            .query_param("type", "input");
        then.status(200).header("content-type", "image/png").body(png);
    });

    let mut client = client_for(&server);
    let mut artifact = client.get_graph("56", FileType::Input, None).unwrap().unwrap();
    mock.assert();

    assert_eq!(artifact.file_name(), "features.png");
    assert_eq!(artifact.content_type(), "image/png");
    assert!(artifact.path().exists());

    let mut bytes = Vec::new();
    artifact.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, png);

    artifact.seek(SeekFrom::Start(0)).unwrap();
    let path = artifact.path().to_path_buf();
    drop(artifact);
    assert!(!path.exists());
}

#[test]
fn test_template_with_version_query() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/algorithms/56/template")
            .query_param("type", "output")
            .query_param("version", "1.2.2");
        then.status(200).header("content-type", "text/csv").body("a,b\n");
    });

    let mut client = client_for(&server);
    let mut artifact = client
        .get_template("56", FileType::Output, Some("1.2.2"))
        .unwrap()
        .unwrap();
    mock.assert();
    assert_eq!(artifact.file_name(), "features.csv");
    assert_eq!(artifact.read_to_vec().unwrap(), b"a,b\n");
}

#[test]
fn test_verify_token_throttled() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/token/verify/")
            .json_body(json!({"token": "abc"}));
        then.status(429)
            .header("content-type", "application/json")
            .json_body(json!({"detail": "Request was throttled. Expected available in 20 seconds."}));
    });

    let mut client = client_for(&server);
    let err = client.verify_token("abc").unwrap_err();
    assert!(matches!(err, Error::Client(_)));
    assert!(err.to_string().contains("Request was throttled"));
}

#[test]
fn test_generated_token_is_sent_as_bearer() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/token/")
            .json_body(json!({"username": "user", "password": "secret"}));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"token": "acc.jwt", "refresh_token": "ref.jwt"}));
    });
    let algorithms = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/algorithms")
            .header("Authorization", "Bearer acc.jwt");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([{"id": "mass_estimation", "versions": [{"version": "1.3.0"}]}]));
    });

    let mut client = Client::new(ClientConfig {
        api_base: server.url("/api/"),
        ..ClientConfig::default()
    })
    .unwrap();
    client.generate_token("user", "secret").unwrap();

    let list = client.get_algorithms().unwrap().unwrap();
    algorithms.assert();
    assert_eq!(list[0].id, "mass_estimation");
}

#[test]
fn test_cancel_task_acknowledged() {
    let server = MockServer::start();
    let cancel = server.mock(|when, then| {
        when.method(DELETE).path("/api/v1/algorithms/tasks/t1");
        then.status(202)
            .header("content-type", "application/json")
            .json_body(json!({"error": "False", "reference": "t1", "status": "Canceled"}));
    });

    let mut client = client_for(&server);
    let task = client.cancel_task("t1").unwrap().unwrap();
    cancel.assert();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[test]
fn test_training_job_id_is_surfaced() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/algorithms/56/fit")
            .body_includes("features.parquet")
            .body_includes("export_new_version");
        then.status(202)
            .header("content-type", "application/json")
            .json_body(json!({"error": "False", "reference": "t9", "status": "Pending", "job_id": 4412}));
    });

    let mut client = client_for(&server);
    let opts = TrainOptions {
        content_type: Some("application/parquet".into()),
        export_new_version: true,
        ..TrainOptions::default()
    };
    let task = client.train_algorithm("56", b"PAR1".to_vec(), &opts).unwrap().unwrap();
    assert_eq!(task.reference, "t9");
    assert_eq!(task.job_id.as_deref(), Some("4412"));
}

#[test]
fn test_unknown_content_type_never_reaches_server() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.any_request();
        then.status(200);
    });

    let mut client = client_for(&server);
    let opts = RunOptions {
        content_type: Some("text/html".into()),
        ..RunOptions::default()
    };
    let err = client.run_algorithm("56", b"<p>".to_vec(), &opts).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    mock.assert_hits(0);
}

#[test]
fn test_unreachable_service_is_server_failure() {
    let config = ClientConfig {
        api_base: "http://127.0.0.1:9/api/".into(),
        timeout_secs: 2,
        ..ClientConfig::with_api_key(KEY)
    };
    let mut client = Client::new(config).unwrap();
    assert!(client.get_algorithms().unwrap().is_none());
    let err = client.last_error().unwrap();
    assert!(matches!(err, Error::Server(_)));
    assert_eq!(err.status_code(), Some(0));
}
