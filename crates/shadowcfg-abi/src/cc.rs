use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{AbiResolutionError, Result};
use crate::probe::{AbiProbe, ProbeRequest};
use crate::table::AbiTable;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Builds and runs a tiny C program against the local kernel headers.
///
/// The compiler is `$CC` when set, `cc` otherwise. Compilation uses `-Wall -Werror -O2` so a
/// header that only half-defines a constant fails loudly instead of producing a value.
#[derive(Debug, Clone)]
pub struct CcProbe {
    compiler: OsString,
}

impl CcProbe {
    pub fn new() -> Self {
        Self {
            compiler: env::var_os("CC").unwrap_or_else(|| OsString::from("cc")),
        }
    }

    pub fn with_compiler(compiler: impl Into<OsString>) -> Self {
        Self {
            compiler: compiler.into(),
        }
    }

    pub fn compiler(&self) -> &OsString {
        &self.compiler
    }
}

impl Default for CcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AbiProbe for CcProbe {
    fn run(&self, request: &ProbeRequest<'_>) -> Result<AbiTable> {
        validate_request(request)?;
        let deadline = Instant::now() + request.timeout;

        let dir = tempfile::Builder::new()
            .prefix("shadowcfg-abi-probe-")
            .tempdir()?;
        let source = dir.path().join("probe.c");
        let binary = dir.path().join("probe");
        fs::write(&source, probe_source(request.headers, request.constants))?;

        let mut compile = Command::new(&self.compiler);
        compile.args(["-Wall", "-Werror", "-O2"]);
        for include in request.include_dirs {
            compile.arg("-I").arg(include);
        }
        compile.arg("-o").arg(&binary).arg(&source);

        tracing::debug!(
            compiler = ?self.compiler,
            dir = %dir.path().display(),
            "compiling ABI probe"
        );
        let output = run_bounded(&mut compile, Stage::Compile, deadline, request.timeout)?;
        if !output.status.success() {
            return Err(AbiResolutionError::CompileFailed {
                code: output.status.code(),
                stderr: output.stderr,
            });
        }

        let output = run_bounded(
            &mut Command::new(&binary),
            Stage::Run,
            deadline,
            request.timeout,
        )?;
        if !output.status.success() {
            return Err(AbiResolutionError::ProbeFailed {
                code: output.status.code(),
                stderr: output.stderr,
            });
        }

        parse_probe_output(&output.stdout, request.constants)
    }
}

fn validate_request(request: &ProbeRequest<'_>) -> Result<()> {
    if request.constants.is_empty() {
        return Err(AbiResolutionError::NoConstants);
    }
    if let Some(bad) = request.constants.iter().find(|n| !is_c_identifier(n)) {
        return Err(AbiResolutionError::InvalidConstantName(bad.clone()));
    }
    if let Some(bad) = request.headers.iter().find(|h| !is_header_name(h)) {
        return Err(AbiResolutionError::InvalidHeader(bad.clone()));
    }
    Ok(())
}

pub(crate) fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn is_header_name(header: &str) -> bool {
    !header.is_empty()
        && !header.starts_with('/')
        && !header.split('/').any(|part| part.is_empty() || part == "..")
        && header
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'_' | b'-'))
}

/// C source printing `NAME=value` for every constant, one per line.
pub(crate) fn probe_source(headers: &[String], constants: &[String]) -> String {
    let mut src = String::from("#include <stdio.h>\n");
    for header in headers {
        src.push_str(&format!("#include <{header}>\n"));
    }
    src.push_str("\nint main(void)\n{\n");
    for name in constants {
        src.push_str(&format!(
            "    printf(\"{name}=%llu\\n\", (unsigned long long)({name}));\n"
        ));
    }
    src.push_str("    return 0;\n}\n");
    src
}

/// Parses probe output into a table holding exactly `requested`.
pub(crate) fn parse_probe_output(text: &str, requested: &[String]) -> Result<AbiTable> {
    let malformed =
        |line: usize, reason: String| AbiResolutionError::MalformedOutput { line, reason };

    let mut table = AbiTable::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| malformed(line_no, format!("expected NAME=value, got {line:?}")))?;
        let (name, value) = (name.trim(), value.trim());
        if !is_c_identifier(name) {
            return Err(malformed(line_no, format!("invalid name {name:?}")));
        }
        if !requested.iter().any(|r| r == name) {
            return Err(malformed(line_no, format!("unrequested constant {name}")));
        }
        let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => value.parse::<u64>(),
        }
        .map_err(|_| malformed(line_no, format!("invalid value {value:?} for {name}")))?;
        if table.insert(name, parsed).is_some() {
            return Err(malformed(line_no, format!("duplicate constant {name}")));
        }
    }

    if let Some(missing) = requested.iter().find(|name| !table.contains(name)) {
        return Err(AbiResolutionError::MissingConstant {
            name: missing.clone(),
        });
    }
    Ok(table)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Stage {
    Compile,
    Run,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Compile => "compilation",
            Stage::Run => "execution",
        }
    }
}

struct BoundedOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Runs `cmd` to completion or until `deadline`, killing it on timeout.
fn run_bounded(
    cmd: &mut Command,
    stage: Stage,
    deadline: Instant,
    timeout: Duration,
) -> Result<BoundedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let program = cmd.get_program().to_string_lossy().into_owned();

    let mut child = spawn(cmd).map_err(|err| match (stage, err.kind()) {
        (Stage::Compile, io::ErrorKind::NotFound) => AbiResolutionError::CompilerNotFound {
            compiler: program.clone(),
        },
        _ => AbiResolutionError::Spawn {
            program: program.clone(),
            source: err,
        },
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            kill(&mut child);
            tracing::warn!(
                program = %program,
                stage = stage.name(),
                ?timeout,
                "ABI probe timed out"
            );
            // The pipe readers are left to finish on their own; a grandchild may still hold the
            // pipes open.
            return Err(AbiResolutionError::Timeout {
                stage: stage.name(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(BoundedOutput {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn spawn(cmd: &mut Command) -> io::Result<Child> {
    let mut attempts = 0u64;
    loop {
        match cmd.spawn() {
            Ok(child) => return Ok(child),
            Err(err) => {
                // A freshly written executable can briefly report ETXTBSY while another thread's
                // fork still holds its write descriptor.
                #[cfg(unix)]
                let should_retry = err.raw_os_error() == Some(26);
                #[cfg(not(unix))]
                let should_retry = false;

                if should_retry && attempts < 3 {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(10 * attempts));
                    continue;
                }
                return Err(err);
            }
        }
    }
}

fn kill(child: &mut Child) {
    if let Err(err) = child.kill() {
        tracing::debug!(%err, "failed to kill timed-out ABI probe process");
    }
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
