// Command catalog: the executable scripts either side exposes for remote
// invocation, and the executor that runs them.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CommandDirs;
use crate::error::CommandError;

/// The set of commands found in the builtin and user directories.
///
/// The catalog is re-read on every listing and resolution so that operators
/// can drop in or replace scripts without restarting the agents. A user
/// script shadows a builtin script with the same filename.
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    dirs: CommandDirs,
}

impl CommandCatalog {
    pub fn new(dirs: CommandDirs) -> Self {
        Self { dirs }
    }

    /// Force the executable bits on the builtin scripts.
    ///
    /// Packaging layers tend to strip the executable bit from data files;
    /// without this the shipped scripts would silently disappear from the
    /// catalog. A missing builtin directory is not an error.
    pub fn fix_builtin_permissions(&self) -> io::Result<()> {
        let entries = match fs::read_dir(&self.dirs.builtin) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error),
        };
        for entry in entries {
            let path = entry?.path();
            let metadata = fs::metadata(&path)?;
            if metadata.is_file() && metadata.permissions().mode() & 0o111 == 0 {
                debug!(path = %path.display(), "making builtin command executable");
                fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }

    /// Filenames of the executable regular files in both directories, user
    /// entries merged over builtin ones. Ordering is unspecified.
    pub fn list(&self) -> Vec<String> {
        let mut names = std::collections::HashSet::new();
        for directory in [&self.dirs.builtin, &self.dirs.user] {
            let entries = match fs::read_dir(directory) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if is_executable_file(&path) {
                    if let Some(name) = entry.file_name().to_str() {
                        names.insert(name.to_string());
                    }
                }
            }
        }
        names.into_iter().collect()
    }

    /// Resolve a command name to the script that implements it.
    ///
    /// Any directory component of `name` is discarded before resolution, so
    /// remote callers cannot escape the command directories.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, CommandError> {
        let file_name = Path::new(name)
            .file_name()
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        let user = self.dirs.user.join(file_name);
        if user.is_file() {
            return Ok(user);
        }
        let builtin = self.dirs.builtin.join(file_name);
        if builtin.is_file() {
            return Ok(builtin);
        }
        Err(CommandError::UnknownCommand(name.to_string()))
    }

    /// Run a command with the given arguments.
    ///
    /// `input`, when present, is fed to the script on standard input. With
    /// `capture` the standard output stream is collected and returned;
    /// without it the script inherits the agent's stdout and an empty string
    /// is returned. A nonzero exit status is an error either way.
    pub async fn execute(
        &self,
        argv: &[String],
        input: Option<&str>,
        capture: bool,
        extra_env: &[(String, String)],
    ) -> Result<String, CommandError> {
        let name = argv.first().ok_or_else(|| CommandError::UnknownCommand(String::new()))?;
        let path = self.resolve(name)?;
        debug!(command = %path.display(), "executing command");

        let mut command = Command::new(&path);
        command.args(&argv[1..]);
        for (key, value) in extra_env {
            command.env(key, value);
        }
        command.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() });
        command.stdout(if capture { Stdio::piped() } else { Stdio::inherit() });

        let mut child = command
            .spawn()
            .map_err(|source| CommandError::Spawn { command: name.clone(), source })?;

        if let Some(input) = input {
            let mut stdin = child.stdin.take().ok_or_else(|| CommandError::Input {
                command: name.clone(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "stdin was not captured"),
            })?;
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|source| CommandError::Input { command: name.clone(), source })?;
            // Dropping the handle closes the pipe so the script sees EOF.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| CommandError::Wait { command: name.clone(), source })?;
        if !output.status.success() {
            warn!(command = %name, status = %output.status, "command failed");
            return Err(CommandError::Failed { command: name.clone(), status: output.status });
        }
        String::from_utf8(output.stdout)
            .map_err(|_| CommandError::NonUtf8Output { command: name.clone() })
    }
}

fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
