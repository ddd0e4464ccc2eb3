// End-to-end exercise of the RPC endpoint with the command dispatcher over
// an in-memory stream.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use negotiator_common::commands::CommandCatalog;
use negotiator_common::config::CommandDirs;
use negotiator_common::dispatch::CommandDispatcher;
use negotiator_common::endpoint::Endpoint;
use negotiator_common::error::CallError;
use negotiator_common::transport::StreamTransport;

type DuplexEndpoint = Endpoint<StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>;

fn endpoint_pair() -> (DuplexEndpoint, DuplexEndpoint) {
    let (near, far) = tokio::io::duplex(4096);
    let (near_read, near_write) = tokio::io::split(near);
    let (far_read, far_write) = tokio::io::split(far);
    (
        Endpoint::new(StreamTransport::new(near_read, near_write, "caller end")),
        Endpoint::new(StreamTransport::new(far_read, far_write, "server end")),
    )
}

fn write_script(directory: &Path, name: &str, body: &str) {
    let path = directory.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should be written");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("script should be made executable");
}

fn serve_in_background(
    mut server: DuplexEndpoint,
    mut dispatcher: CommandDispatcher,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        server.serve(&mut dispatcher).await.expect("serve should end cleanly");
    })
}

#[tokio::test]
async fn lists_commands_with_user_overrides() {
    let builtin = TempDir::new().expect("temp dir should be created");
    let user = TempDir::new().expect("temp dir should be created");
    write_script(builtin.path(), "alpha", "echo alpha");
    write_script(builtin.path(), "beta", "echo builtin beta");
    write_script(user.path(), "beta", "echo user beta");
    write_script(user.path(), "gamma", "echo gamma");

    let dispatcher = CommandDispatcher::new(CommandCatalog::new(CommandDirs {
        builtin: builtin.path().to_path_buf(),
        user: user.path().to_path_buf(),
    }));
    let (mut client, server) = endpoint_pair();
    let task = serve_in_background(server, dispatcher);

    let result = client
        .call("list_commands", Vec::new(), Map::new())
        .await
        .expect("list_commands should succeed");
    let mut names: Vec<String> = result
        .as_array()
        .expect("result should be an array")
        .iter()
        .map(|value| value.as_str().expect("names should be strings").to_string())
        .collect();
    names.sort();
    assert_eq!(names, ["alpha", "beta", "gamma"]);

    // The shadowed name runs the user script.
    let output = client
        .call("execute", vec![json!("beta")], Map::new())
        .await
        .expect("execute should succeed");
    assert_eq!(output, Value::String("user beta\n".to_string()));

    drop(client);
    task.await.expect("server task should finish");
}

#[tokio::test]
async fn execute_passes_arguments_input_and_reports_failure() {
    let builtin = TempDir::new().expect("temp dir should be created");
    let user = TempDir::new().expect("temp dir should be created");
    write_script(builtin.path(), "echo-args", "echo \"$@\"");
    write_script(builtin.path(), "copy-input", "cat");
    write_script(builtin.path(), "broken", "echo doomed; exit 7");

    let dispatcher = CommandDispatcher::new(CommandCatalog::new(CommandDirs {
        builtin: builtin.path().to_path_buf(),
        user: user.path().to_path_buf(),
    }));
    let (mut client, server) = endpoint_pair();
    let task = serve_in_background(server, dispatcher);

    let output = client
        .call("execute", vec![json!("echo-args"), json!("one"), json!("two")], Map::new())
        .await
        .expect("execute should succeed");
    assert_eq!(output, Value::String("one two\n".to_string()));

    let mut kw = Map::new();
    kw.insert("input".to_string(), json!("fed on stdin\n"));
    let output = client
        .call("execute", vec![json!("copy-input")], kw)
        .await
        .expect("execute with input should succeed");
    assert_eq!(output, Value::String("fed on stdin\n".to_string()));

    let error = client
        .call("execute", vec![json!("broken")], Map::new())
        .await
        .expect_err("failing command should be reported");
    assert!(matches!(error, CallError::RemoteMethodFailed(message) if message.contains("broken")));

    // The failure did not poison the endpoint.
    let output = client
        .call("execute", vec![json!("echo-args")], Map::new())
        .await
        .expect("endpoint should still serve after a failure");
    assert_eq!(output, Value::String("\n".to_string()));

    drop(client);
    task.await.expect("server task should finish");
}

#[tokio::test]
async fn executing_an_unknown_command_is_a_remote_failure() {
    let builtin = TempDir::new().expect("temp dir should be created");
    let user = TempDir::new().expect("temp dir should be created");

    let dispatcher = CommandDispatcher::new(CommandCatalog::new(CommandDirs {
        builtin: builtin.path().to_path_buf(),
        user: user.path().to_path_buf(),
    }));
    let (mut client, server) = endpoint_pair();
    let task = serve_in_background(server, dispatcher);

    let error = client
        .call("execute", vec![json!("missing")], Map::new())
        .await
        .expect_err("unknown command should fail");
    assert!(matches!(
        error,
        CallError::RemoteMethodFailed(message) if message.contains("no such command")
    ));

    drop(client);
    task.await.expect("server task should finish");
}
