// The set of methods an endpoint exposes to its remote side.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::commands::CommandCatalog;

/// The methods an endpoint exposes to the remote side.
///
/// The serve loop consults [`methods`](Dispatcher::methods) before invoking
/// anything, so an implementation never sees a name it did not advertise.
/// Names starting with an underscore are rejected by the serve loop and must
/// not be advertised.
#[async_trait]
pub trait Dispatcher: Send {
    /// Names the remote side may invoke.
    fn methods(&self) -> &[&str];

    /// Invoke `method` with positional and keyword arguments. Errors are
    /// reported to the remote side as a failure response; they do not
    /// terminate the serve loop.
    async fn invoke(
        &mut self,
        method: &str,
        args: &[Value],
        kw: &Map<String, Value>,
    ) -> Result<Value>;
}

/// The dispatcher both agents register: command listing and execution.
///
/// The host side adds `NEGOTIATOR_GUEST` to the environment of executed
/// scripts so they can tell which guest invoked them; the guest side runs
/// with an empty extra environment.
pub struct CommandDispatcher {
    catalog: CommandCatalog,
    extra_env: Vec<(String, String)>,
}

impl CommandDispatcher {
    pub fn new(catalog: CommandCatalog) -> Self {
        if let Err(error) = catalog.fix_builtin_permissions() {
            warn!(%error, "failed to restore executable bits on builtin commands");
        }
        Self { catalog, extra_env: Vec::new() }
    }

    /// Add an environment variable to every executed command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    async fn execute(&self, args: &[Value], kw: &Map<String, Value>) -> Result<Value> {
        let argv = args
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .context("execute arguments must be strings")
            })
            .collect::<Result<Vec<String>>>()?;
        if argv.is_empty() {
            bail!("execute requires at least a command name");
        }

        let input = match kw.get("input") {
            None | Some(Value::Null) => None,
            Some(Value::String(input)) => Some(input.as_str()),
            Some(_) => bail!("the `input` option must be a string or null"),
        };
        let capture = match kw.get("capture") {
            None => true,
            Some(Value::Bool(capture)) => *capture,
            Some(_) => bail!("the `capture` option must be a boolean"),
        };

        let output = self.catalog.execute(&argv, input, capture, &self.extra_env).await?;
        Ok(Value::String(output))
    }
}

#[async_trait]
impl Dispatcher for CommandDispatcher {
    fn methods(&self) -> &[&str] {
        &["list_commands", "execute"]
    }

    async fn invoke(
        &mut self,
        method: &str,
        args: &[Value],
        kw: &Map<String, Value>,
    ) -> Result<Value> {
        match method {
            "list_commands" => {
                let names = self.catalog.list().into_iter().map(Value::String).collect();
                Ok(Value::Array(names))
            }
            "execute" => self.execute(args, kw).await,
            other => bail!("Method {other} not supported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use serde_json::{json, Map, Value};
    use tempfile::TempDir;

    use super::{CommandDispatcher, Dispatcher};
    use crate::commands::CommandCatalog;
    use crate::config::CommandDirs;

    fn dispatcher(builtin: &TempDir, user: &TempDir) -> CommandDispatcher {
        CommandDispatcher::new(CommandCatalog::new(CommandDirs {
            builtin: builtin.path().to_path_buf(),
            user: user.path().to_path_buf(),
        }))
    }

    fn write_script(directory: &std::path::Path, name: &str, body: &str) {
        let path = directory.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script should be written");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("script should be made executable");
    }

    #[tokio::test]
    async fn list_commands_returns_an_array_of_names() {
        let builtin = TempDir::new().expect("temp dir should be created");
        let user = TempDir::new().expect("temp dir should be created");
        write_script(builtin.path(), "alpha", "echo alpha");

        let mut dispatcher = dispatcher(&builtin, &user);
        let result = dispatcher
            .invoke("list_commands", &[], &Map::new())
            .await
            .expect("list_commands should succeed");
        assert_eq!(result, json!(["alpha"]));
    }

    #[tokio::test]
    async fn execute_rejects_non_string_arguments() {
        let builtin = TempDir::new().expect("temp dir should be created");
        let user = TempDir::new().expect("temp dir should be created");

        let mut dispatcher = dispatcher(&builtin, &user);
        let error = dispatcher
            .invoke("execute", &[json!(42)], &Map::new())
            .await
            .expect_err("non-string argv should be rejected");
        assert!(error.to_string().contains("must be strings"));
    }

    #[tokio::test]
    async fn execute_runs_the_user_override() {
        let builtin = TempDir::new().expect("temp dir should be created");
        let user = TempDir::new().expect("temp dir should be created");
        write_script(builtin.path(), "beta", "echo builtin");
        write_script(user.path(), "beta", "echo user");

        let mut dispatcher = dispatcher(&builtin, &user);
        let result = dispatcher
            .invoke("execute", &[json!("beta")], &Map::new())
            .await
            .expect("execute should succeed");
        assert_eq!(result, Value::String("user\n".to_string()));
    }
}
