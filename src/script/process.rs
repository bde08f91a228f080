/// Process script host
///
/// Runs a script with an external interpreter and turns its stdout into output streams. Handles
/// runtime selection, environment export, timeout monitoring and exit codes.
use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::context::{MessageType, ScriptContext, ScriptMessage};
use super::host::{EvaluationError, ScriptHost};
use super::source::ScriptSource;
use crate::output::{BuildAction, OutputError, OutputFileWriter};

/// Prefix of stdout lines that control output streams instead of being written
pub const COMMAND_PREFIX: &str = "##scriptgen:";

const DEFAULT_RUNTIME: &str = "sh";

/// Interpreter plus leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RuntimeCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Runtime named by a `#!` first line, if any
    pub fn from_shebang(code: &str) -> Option<Self> {
        let first = code.lines().next()?.strip_prefix("#!")?;
        let mut parts = first.split_whitespace();
        let program = parts.next()?;
        let mut args: Vec<String> = parts.map(str::to_string).collect();
        // `env -S` splits the rest itself; we already did
        if Path::new(program).file_name().is_some_and(|n| n == "env") && args.first().is_some_and(|a| a == "-S") {
            args.remove(0);
        }
        Some(Self::new(program, args))
    }
}

/// Runs scripts as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessHost {
    runtime: Option<RuntimeCommand>,
    timeout: Option<Duration>,
}

impl ProcessHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always use this runtime instead of the shebang
    pub fn with_runtime(mut self, runtime: Option<RuntimeCommand>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn runtime_for(&self, source: &ScriptSource) -> RuntimeCommand {
        self.runtime
            .clone()
            .or_else(|| RuntimeCommand::from_shebang(source.code()))
            .unwrap_or_else(|| RuntimeCommand::new(DEFAULT_RUNTIME, Vec::new()))
    }

    fn command(&self, source: &ScriptSource, context: &ScriptContext) -> Command {
        let runtime = self.runtime_for(source);
        let program = which::which(&runtime.program).unwrap_or_else(|e| {
            tracing::warn!(
                runtime = %runtime.program,
                error = %e,
                "runtime not found in PATH, trying as-is"
            );
            PathBuf::from(&runtime.program)
        });

        let script_path = source.file_path();
        let mut cmd = Command::new(&program);
        cmd.args(&runtime.args).arg(script_path);
        if let Some(parent) = script_path.parent() {
            cmd.current_dir(parent);
        }

        cmd.env("SCRIPTGEN_SCRIPT_PATH", script_path)
            .env("SCRIPTGEN_PROJECT_PATH", context.project_file_path())
            .env(
                "SCRIPTGEN_DEFAULT_OUTPUT",
                context.outputs().default_target_path(),
            );
        if let Some(solution) = context.solution_file_path() {
            cmd.env("SCRIPTGEN_SOLUTION_PATH", solution);
        }
        export_paths(
            &mut cmd,
            "SCRIPTGEN_LOADS",
            context.loads().iter().map(|l| l.path.clone()),
        );
        export_paths(
            &mut cmd,
            "SCRIPTGEN_REFERENCES",
            context.references().iter().map(|r| PathBuf::from(&r.display)),
        );
        for (name, value) in context.project().properties() {
            cmd.env(property_variable(name), value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group so a timeout also reaches processes the script started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        tracing::debug!(command = ?cmd, "spawning script runtime");
        cmd
    }

    fn run(&self, source: &ScriptSource, context: &mut ScriptContext) -> Result<Vec<anyhow::Error>> {
        let start = Instant::now();
        let mut child = self
            .command(source, context)
            .spawn()
            .with_context(|| format!("Failed to spawn runtime: {}", self.runtime_for(source).program))?;

        let stdout = child.stdout.take().map(read_lines);
        let stderr = child.stderr.take().map(read_lines);

        let status = match self.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
            None => Some(child.wait().context("Failed to wait for child process")?),
        };

        let Some(status) = status else {
            // Readers are left detached; an orphan outside the group may still hold the pipes
            drop(stdout);
            drop(stderr);
            bail!(
                "Script execution timed out after {}s",
                self.timeout.map(|t| t.as_secs_f64()).unwrap_or_default()
            );
        };

        let stdout = join_lines(stdout);
        let stderr = join_lines(stderr);

        let mut errors = Vec::new();
        let mut stream = StreamState::default();
        for line in &stdout {
            if let Err(e) = stream.apply(line, context) {
                errors.push(e);
            }
        }

        let mut plain_stderr = Vec::new();
        for line in stderr {
            match ScriptMessage::parse_structured(&line) {
                Some(message) => context.log(message.message_type, message.message),
                None => plain_stderr.push(line),
            }
        }

        tracing::debug!(
            script = %source.file_path().display(),
            duration_ms = start.elapsed().as_millis() as u64,
            exit_code = ?status.code(),
            "script process finished"
        );

        if !status.success() {
            let mut message = match status.code() {
                Some(code) => format!("Script exited with code {}", code),
                None => "Script was terminated by a signal".to_string(),
            };
            if !plain_stderr.is_empty() {
                message.push_str(": ");
                message.push_str(plain_stderr.join("\n").trim());
            }
            errors.push(anyhow!(message));
        } else {
            for line in plain_stderr.iter().filter(|l| !l.trim().is_empty()) {
                context.log(MessageType::Info, line.as_str());
            }
        }

        Ok(errors)
    }
}

impl ScriptHost for ProcessHost {
    fn evaluate(
        &self,
        source: &ScriptSource,
        context: &mut ScriptContext,
    ) -> Result<(), EvaluationError> {
        let mut errors = self.run(source, context).map_err(EvaluationError::Runtime)?;
        match errors.len() {
            0 => Ok(()),
            1 => Err(EvaluationError::Runtime(errors.remove(0))),
            _ => Err(EvaluationError::Aggregate(errors)),
        }
    }
}

/// Which stream plain stdout lines go to
#[derive(Debug, Default)]
struct StreamState {
    /// `None` is the default stream
    current: Option<String>,
}

impl StreamState {
    fn writer<'a>(&self, context: &'a mut ScriptContext) -> Result<&'a mut OutputFileWriter, OutputError> {
        match &self.current {
            Some(name) => context.output().get(name),
            None => context.output().default_output(),
        }
    }

    fn apply(&mut self, line: &str, context: &mut ScriptContext) -> Result<()> {
        let Some(command) = line.trim_start().strip_prefix(COMMAND_PREFIX) else {
            let writer = self.writer(context)?;
            if line.is_empty() {
                writer.new_line()?;
            } else {
                writer.write_line(line)?;
            }
            return Ok(());
        };

        let command = command.trim();
        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map(|(n, a)| (n, a.trim()))
            .unwrap_or((command, ""));

        match name {
            "output" => {
                if argument.is_empty() {
                    bail!("output requires a file name");
                }
                context.output().get(argument)?;
                self.current = Some(argument.to_string());
            }
            "default" => self.current = None,
            "extension" => {
                context.output().set_extension(argument)?;
            }
            "path" => {
                context.output().set_file_path(argument)?;
            }
            "keep" => {
                let keep = parse_switch(argument, "true", "false")?;
                match &self.current {
                    Some(name) => context.output().get(name)?.set_keep_output(keep),
                    None => context.output().set_keep_output(keep),
                }
            }
            "build-action" => {
                let action: BuildAction = argument.parse().map_err(|e: String| anyhow!(e))?;
                self.writer(context)?.set_build_action(action);
            }
            "indent" => {
                let writer = self.writer(context)?;
                if argument.is_empty() {
                    writer.indent();
                } else {
                    let level: isize = argument
                        .parse()
                        .with_context(|| format!("Invalid indent level: {}", argument))?;
                    writer.indent_to(level);
                }
            }
            "dedent" => {
                self.writer(context)?.dedent();
            }
            "format" => {
                let enabled = parse_switch(argument, "on", "off")?;
                self.writer(context)?.set_format_enabled(enabled);
            }
            other => bail!("Unknown output command: {}", other),
        }
        Ok(())
    }
}

fn parse_switch(argument: &str, on: &str, off: &str) -> Result<bool> {
    if argument.eq_ignore_ascii_case(on) {
        Ok(true)
    } else if argument.eq_ignore_ascii_case(off) {
        Ok(false)
    } else {
        bail!("Expected '{}' or '{}', got '{}'", on, off, argument)
    }
}

/// `SCRIPTGEN_PROPERTY_<NAME>` with the name upper-cased and non-alphanumerics replaced
pub fn property_variable(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("SCRIPTGEN_PROPERTY_{}", name)
}

fn export_paths(cmd: &mut Command, variable: &str, paths: impl Iterator<Item = PathBuf>) {
    match std::env::join_paths(paths) {
        Ok(joined) => {
            cmd.env(variable, joined);
        }
        Err(e) => tracing::warn!(variable, error = %e, "could not export path list"),
    }
}

fn read_lines<R: Read + Send + 'static>(pipe: R) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        BufReader::new(pipe)
            .lines()
            .map_while(|line| line.ok())
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    })
}

fn join_lines(handle: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Wait for the child, killing it after `timeout`. `None` means it timed out.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            kill_process_tree(child)?;
            child.wait()?; // Reap zombie
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        tracing::warn!(pid = child.id(), error = %e, "failed to kill process group");
        child.kill()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_from_shebang() {
        assert_eq!(
            RuntimeCommand::from_shebang("#!/usr/bin/env -S python3 -u\nprint()"),
            Some(RuntimeCommand::new("/usr/bin/env", vec!["python3".into(), "-u".into()]))
        );
        assert_eq!(
            RuntimeCommand::from_shebang("#!/bin/bash\n"),
            Some(RuntimeCommand::new("/bin/bash", vec![]))
        );
        assert_eq!(RuntimeCommand::from_shebang("#load \"a.cs\"\n"), None);
        assert_eq!(RuntimeCommand::from_shebang(""), None);
    }

    #[test]
    fn test_property_variable_names() {
        assert_eq!(property_variable("Configuration"), "SCRIPTGEN_PROPERTY_CONFIGURATION");
        assert_eq!(property_variable("Root.Namespace"), "SCRIPTGEN_PROPERTY_ROOT_NAMESPACE");
    }

    #[test]
    fn test_parse_switch() {
        assert!(parse_switch("ON", "on", "off").unwrap());
        assert!(!parse_switch("false", "true", "false").unwrap());
        assert!(parse_switch("maybe", "on", "off").is_err());
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use crate::project::Project;
        use crate::script::behavior::OutputBehavior;
        use crate::script::engine::Engine;
        use crate::script::result::EvaluationOutcome;
        use std::collections::BTreeMap;
        use std::fs;
        use std::sync::Arc;
        use tempfile::TempDir;

        fn run(temp: &TempDir, code: &str, host: ProcessHost, behavior: OutputBehavior) -> crate::script::ScriptResult {
            let mut properties = BTreeMap::new();
            properties.insert("Configuration".to_string(), "Release".to_string());
            let project = Project::new(temp.path())
                .unwrap()
                .with_properties(properties)
                .with_formatting_defaults(Default::default());
            let script = temp.path().join("gen.csx");
            fs::write(&script, code).unwrap();
            Engine::new(Arc::new(project), Arc::new(host))
                .with_output_behavior(behavior)
                .evaluate_file(&script)
                .unwrap()
        }

        #[test]
        fn test_stdout_becomes_default_output() {
            let temp = TempDir::new().unwrap();
            let result = run(
                &temp,
                "echo 'public class Generated {'\necho\necho '}'\n",
                ProcessHost::new(),
                OutputBehavior::default(),
            );

            assert_eq!(result.outcome(), EvaluationOutcome::Succeeded);
            assert_eq!(
                fs::read_to_string(temp.path().join("gen.cs")).unwrap(),
                "public class Generated {\n\n}\n"
            );
        }

        #[test]
        fn test_output_commands_switch_streams() {
            let temp = TempDir::new().unwrap();
            let code = "\
echo '##scriptgen: extension json'
echo '{'
echo '##scriptgen: output sub/notes.txt'
echo '##scriptgen: indent'
echo 'note'
echo '##scriptgen: default'
echo '}'
";
            let result = run(&temp, code, ProcessHost::new(), OutputBehavior::default());

            assert!(result.errors().is_empty(), "{:?}", result.errors());
            assert_eq!(fs::read_to_string(temp.path().join("gen.json")).unwrap(), "{\n}\n");
            assert_eq!(
                fs::read_to_string(temp.path().join("sub/notes.txt")).unwrap(),
                "    note\n"
            );
        }

        #[test]
        fn test_environment_is_exported() {
            let temp = TempDir::new().unwrap();
            let result = run(
                &temp,
                "echo \"$SCRIPTGEN_PROPERTY_CONFIGURATION\"\nbasename \"$SCRIPTGEN_DEFAULT_OUTPUT\"\n",
                ProcessHost::new(),
                OutputBehavior::default(),
            );

            assert!(result.errors().is_empty());
            assert_eq!(
                fs::read_to_string(temp.path().join("gen.cs")).unwrap(),
                "Release\ngen.cs\n"
            );
        }

        #[test]
        fn test_structured_stderr_becomes_messages() {
            let temp = TempDir::new().unwrap();
            let result = run(
                &temp,
                "echo 'Warning|check me' >&2\necho 'Error|bad thing' >&2\n",
                ProcessHost::new(),
                OutputBehavior::default(),
            );

            let messages: Vec<_> = result
                .messages()
                .iter()
                .map(|m| (m.message_type, m.message.as_str()))
                .collect();
            assert_eq!(
                messages,
                vec![(MessageType::Warning, "check me"), (MessageType::Error, "bad thing")]
            );
        }

        #[test]
        fn test_non_zero_exit_is_a_runtime_failure() {
            let temp = TempDir::new().unwrap();
            fs::write(temp.path().join("gen.cs"), "previous").unwrap();
            let result = run(
                &temp,
                "echo partial\necho 'went wrong' >&2\nexit 4\n",
                ProcessHost::new(),
                OutputBehavior::DontOverwriteIfEvaluationFails,
            );

            assert_eq!(result.outcome(), EvaluationOutcome::RuntimeFailed);
            assert!(result.errors()[0].message.contains("code 4"));
            assert!(result.errors()[0].message.contains("went wrong"));
            assert_eq!(fs::read_to_string(temp.path().join("gen.cs")).unwrap(), "previous");
        }

        #[test]
        fn test_unknown_command_is_reported() {
            let temp = TempDir::new().unwrap();
            let result = run(
                &temp,
                "echo '##scriptgen: explode'\n",
                ProcessHost::new(),
                OutputBehavior::default(),
            );
            assert_eq!(result.outcome(), EvaluationOutcome::RuntimeFailed);
            assert!(result.errors()[0].message.contains("explode"));
        }

        #[test]
        fn test_timeout_kills_the_script() {
            let temp = TempDir::new().unwrap();
            let result = run(
                &temp,
                "exec sleep 10\n",
                ProcessHost::new().with_timeout(Some(Duration::from_millis(200))),
                OutputBehavior::default(),
            );
            assert_eq!(result.outcome(), EvaluationOutcome::RuntimeFailed);
            assert!(result.errors()[0].message.contains("timed out"));
        }

        #[test]
        fn test_timeout_kills_processes_started_by_the_script() {
            let temp = TempDir::new().unwrap();
            let started = Instant::now();
            let result = run(
                &temp,
                "echo before\nsleep 5\necho after\n",
                ProcessHost::new().with_timeout(Some(Duration::from_millis(200))),
                OutputBehavior::default(),
            );

            assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
            assert_eq!(result.outcome(), EvaluationOutcome::RuntimeFailed);
            assert!(result.errors()[0].message.contains("timed out"));
            assert!(!temp.path().join("gen.cs").exists());
        }

        #[test]
        fn test_configured_runtime_wins_over_shebang() {
            let temp = TempDir::new().unwrap();
            let result = run(
                &temp,
                "#!/definitely/not/here\necho configured\n",
                ProcessHost::new().with_runtime(Some(RuntimeCommand::new("sh", vec![]))),
                OutputBehavior::default(),
            );
            assert!(result.errors().is_empty(), "{:?}", result.errors());
            assert_eq!(
                fs::read_to_string(temp.path().join("gen.cs")).unwrap(),
                "configured\n"
            );
        }
    }
}
