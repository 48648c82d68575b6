// src/system/executor.rs

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{0}' exited with code {1}.")]
    NonZeroExitStatus(String, i32),
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

/// Splits a command line into program and arguments. A leading `-` marks a command
/// whose failure is ignored.
fn prepare(command_line: &str) -> Result<Option<(Vec<String>, &str, bool)>, ExecutionError> {
    let trimmed = command_line.trim();
    let (line, ignore_errors) = match trimmed.strip_prefix('-') {
        Some(rest) => (rest.trim(), true),
        None => (trimmed, false),
    };
    if line.is_empty() {
        return Ok(None);
    }
    let parts =
        shlex::split(line).ok_or_else(|| ExecutionError::CommandParse(line.to_string()))?;
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some((parts, line, ignore_errors)))
}

fn exit_code(status: ExitStatus) -> i32 {
    // Killed by a signal: no code, report a generic failure.
    status.code().unwrap_or(1)
}

/// Runs an external command line to completion with inherited stdio and returns its
/// exit code. An empty line is a success.
pub fn execute_command(
    command_line: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
) -> Result<i32, ExecutionError> {
    let Some((parts, line, ignore_errors)) = prepare(command_line)? else {
        return Ok(0);
    };
    let Some((program, args)) = parts.split_first() else {
        return Ok(0);
    };
    let clean_cwd = dunce::simplified(cwd);
    log::debug!("Executing '{}' in '{}'", line, clean_cwd.display());

    let status = match StdCommand::new(program)
        .args(args)
        .current_dir(clean_cwd)
        .envs(env_vars)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
    {
        Ok(status) => status,
        // Windows built-ins like `echo` only exist inside cmd.
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            StdCommand::new("cmd")
                .arg("/C")
                .arg(line)
                .current_dir(clean_cwd)
                .envs(env_vars)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .map_err(|e| ExecutionError::CommandFailed(line.to_string(), e))?
        }
        Err(e) => return Err(ExecutionError::CommandFailed(line.to_string(), e)),
    };

    let code = exit_code(status);
    if code != 0 && ignore_errors {
        log::warn!("Ignoring exit code {} from '{}'", code, line);
        return Ok(0);
    }
    Ok(code)
}

/// Runs a short command and captures its standard output. Stderr is passed through.
/// A nonzero exit is an error here, since there is no useful output to return.
pub fn execute_and_capture_output(
    command_line: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
) -> Result<String, ExecutionError> {
    let Some((parts, line, _)) = prepare(command_line)? else {
        return Ok(String::new());
    };
    let Some((program, args)) = parts.split_first() else {
        return Ok(String::new());
    };

    let output = StdCommand::new(program)
        .args(args)
        .current_dir(dunce::simplified(cwd))
        .envs(env_vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| ExecutionError::CommandFailed(line.to_string(), e))?;

    if !output.status.success() {
        return Err(ExecutionError::NonZeroExitStatus(
            line.to_string(),
            exit_code(output.status),
        ));
    }

    String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: line.to_string(),
        source: e,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exit_codes_are_reported() {
        let dir = TempDir::new().unwrap();
        let env = HashMap::new();
        assert_eq!(execute_command("true", dir.path(), &env).unwrap(), 0);
        assert_eq!(execute_command("sh -c 'exit 3'", dir.path(), &env).unwrap(), 3);
        assert_eq!(execute_command("   ", dir.path(), &env).unwrap(), 0);
    }

    #[test]
    fn test_leading_dash_ignores_failure() {
        let dir = TempDir::new().unwrap();
        let code = execute_command("- sh -c 'exit 2'", dir.path(), &HashMap::new()).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn test_runs_in_cwd_with_env() {
        let dir = TempDir::new().unwrap();
        let mut env = HashMap::new();
        env.insert("STRATA_TEST_VALUE".to_string(), "hello".to_string());

        let out = execute_and_capture_output(
            "sh -c 'printf \"%s %s\" \"$STRATA_TEST_VALUE\" \"$(basename \"$(pwd)\")\"'",
            dir.path(),
            &env,
        )
        .unwrap();
        let expected_dir = dir.path().file_name().unwrap().to_string_lossy();
        assert_eq!(out, format!("hello {}", expected_dir));
    }

    #[test]
    fn test_unknown_program_and_bad_quoting_are_errors() {
        let dir = TempDir::new().unwrap();
        let env = HashMap::new();
        assert!(matches!(
            execute_command("strata-no-such-binary-xyz", dir.path(), &env),
            Err(ExecutionError::CommandFailed(..))
        ));
        assert!(matches!(
            execute_command("echo 'unterminated", dir.path(), &env),
            Err(ExecutionError::CommandParse(_))
        ));
    }
}
