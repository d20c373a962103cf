//! One full generation round against an external generator subprocess.
//!
//! A [`Session`] owns a private working directory, the FIFO pair inside it,
//! and the generator child for exactly one call to [`Session::generate`].
//! Teardown is scoped acquisition end to end: the supervisor's `Drop` kills
//! any still-live child, channel drops close the FIFO handles, and the
//! `TempDir` drop removes the directory recursively — on success, on every
//! error variant, and on panic.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;

use crate::channel::{ChannelPair, CommandChannel, ResultChannel};
use crate::codec::{self, Command, FrameError};
use crate::source::BitSource;
use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorError, describe_status};

/// File name the generator writes its program to, inside the working
/// directory. Passed to the child as `-o <path>`.
const ARTIFACT_FILE: &str = "gen.c";

/// Width of every `RAND` draw. The value must fit the 4-byte response.
const RAND_BITS: u32 = 31;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Directory or channel allocation failed; no subprocess was started.
    #[error("session setup failed: {0}")]
    Setup(#[source] io::Error),
    /// Malformed frame, unknown command, or unbalanced region nesting.
    /// Carries the offending detail for diagnosis.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The generator exited abnormally, had to be killed, or could not be
    /// spawned or reaped.
    #[error("generator subprocess failed: {0}")]
    Subprocess(#[from] SupervisorError),
    /// The generator terminated cleanly but never delivered its output.
    #[error("generator terminated cleanly but artifact at {path:?} is unreadable: {source}")]
    ArtifactMissing { path: PathBuf, source: io::Error },
}

/// How to launch the generator for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub shutdown_timeout: Duration,
}

/// A single-use generation session. Construct with [`Session::new`], run
/// with [`Session::generate`] — which consumes the session, so reuse is
/// impossible by construction.
pub struct Session {
    config: SessionConfig,
    workdir: TempDir,
    channels: ChannelPair,
}

impl Session {
    /// Allocates the private working directory and creates the FIFO pair
    /// inside it. The subprocess is not started until [`Session::generate`].
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let workdir = TempDir::new().map_err(SessionError::Setup)?;
        let channels = ChannelPair::create(workdir.path()).map_err(SessionError::Setup)?;
        Ok(Self {
            config,
            workdir,
            channels,
        })
    }

    /// The session's private directory. Removed when the session ends.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Runs one generation round to completion and returns the generated
    /// program text. Every resource allocated along the way is released
    /// before this returns, on every path.
    pub fn generate(self, source: &mut dyn BitSource) -> Result<String, SessionError> {
        let Session {
            config,
            workdir,
            channels,
        } = self;
        let artifact_path = workdir.path().join(ARTIFACT_FILE);

        let mut supervisor = Supervisor::start(&SupervisorConfig {
            binary: config.binary,
            args: config.args,
            artifact_path: artifact_path.clone(),
            commands_path: channels.commands_path().to_path_buf(),
            results_path: channels.results_path().to_path_buf(),
            shutdown_timeout: config.shutdown_timeout,
        })?;

        let mut commands = channels.command_reader();
        let mut results = channels.result_writer();
        let outcome = run_command_loop(&mut commands, &mut results, &mut supervisor, source);
        commands.close();
        results.close();
        outcome?;

        // `workdir` is still alive here; it is dropped (and removed) when
        // this function returns, after the artifact has been read out.
        fs::read_to_string(&artifact_path).map_err(|source| SessionError::ArtifactMissing {
            path: artifact_path,
            source,
        })
    }
}

/// Classifies an unexpected end of the command stream. The child is reaped
/// first: a non-zero exit is the more diagnostic report, a clean exit means
/// the generator broke protocol by leaving without `TERMINATE`.
fn peer_failure(supervisor: &mut Supervisor, detail: String) -> SessionError {
    match supervisor.reap() {
        Ok(Some(status)) if !status.success() => {
            SessionError::Subprocess(SupervisorError::NonZeroExit(describe_status(&status)))
        }
        Ok(_) => SessionError::Protocol(detail),
        Err(e) => SessionError::Subprocess(e),
    }
}

fn send_response(
    results: &mut ResultChannel,
    supervisor: &mut Supervisor,
    value: u32,
) -> Result<(), SessionError> {
    let write = results
        .writer()
        .and_then(|w| codec::write_result(w, value));
    write.map_err(|e| peer_failure(supervisor, format!("results channel write failed: {e}")))
}

/// The protocol state machine: one command per iteration, one response per
/// command, no read-ahead. The generator blocks on each response before its
/// next command, so the two processes alternate in strict lock-step.
fn run_command_loop(
    commands: &mut CommandChannel,
    results: &mut ResultChannel,
    supervisor: &mut Supervisor,
    source: &mut dyn BitSource,
) -> Result<(), SessionError> {
    let mut open_regions: usize = 0;
    loop {
        let reader = commands.reader().map_err(SessionError::Setup)?;
        let text = match codec::read_frame(reader) {
            Ok(Some(text)) => text,
            Ok(None) => {
                return Err(peer_failure(
                    supervisor,
                    "commands channel closed before TERMINATE".to_string(),
                ));
            }
            Err(FrameError::Io(e)) => {
                return Err(peer_failure(
                    supervisor,
                    format!("commands channel read failed: {e}"),
                ));
            }
            Err(e) => return Err(SessionError::Protocol(e.to_string())),
        };

        let command = Command::parse(&text).map_err(|e| SessionError::Protocol(e.to_string()))?;
        match command {
            Command::Rand => {
                let value = source.draw_bits(RAND_BITS) as u32;
                send_response(results, supervisor, value)?;
            }
            Command::Start(label) => {
                source.begin_region(&label);
                open_regions += 1;
                send_response(results, supervisor, 0)?;
            }
            Command::End => {
                if open_regions == 0 {
                    return Err(SessionError::Protocol(
                        format!("{text:?}: END without a matching open START"),
                    ));
                }
                source.end_region();
                open_regions -= 1;
                send_response(results, supervisor, 0)?;
            }
            Command::Terminate => {
                send_response(results, supervisor, 0)?;
                supervisor.shutdown()?;
                if open_regions != 0 {
                    return Err(SessionError::Protocol(format!(
                        "{open_regions} region(s) still open at TERMINATE"
                    )));
                }
                return Ok(());
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::source::BufferSource;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Draw(u32),
        Begin(String),
        End,
    }

    /// Scripted bit source that records every call the session makes.
    struct RecordingSource {
        inner: BufferSource,
        events: Vec<Event>,
    }

    impl RecordingSource {
        fn new(bytes: Vec<u8>) -> Self {
            Self {
                inner: BufferSource::new(bytes),
                events: Vec::new(),
            }
        }
    }

    impl BitSource for RecordingSource {
        fn draw_bits(&mut self, n_bits: u32) -> u64 {
            self.events.push(Event::Draw(n_bits));
            self.inner.draw_bits(n_bits)
        }

        fn begin_region(&mut self, label: &str) {
            self.events.push(Event::Begin(label.to_string()));
        }

        fn end_region(&mut self) {
            self.events.push(Event::End);
        }
    }

    /// Fake generators are shell scripts; running them through /bin/sh keeps
    /// the tests independent of checked-out execute permissions.
    fn script_config(name: &str, timeout_ms: u64) -> SessionConfig {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let script = manifest_dir.join("../test_targets").join(name);
        assert!(script.exists(), "test target missing: {script:?}");
        SessionConfig {
            binary: PathBuf::from("/bin/sh"),
            args: vec![script.to_str().unwrap().to_string()],
            shutdown_timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn run_script(
        name: &str,
        timeout_ms: u64,
        source: &mut dyn BitSource,
    ) -> (Result<String, SessionError>, PathBuf) {
        let session = Session::new(script_config(name, timeout_ms)).unwrap();
        let workdir = session.workdir().to_path_buf();
        assert!(workdir.exists());
        (session.generate(source), workdir)
    }

    #[test]
    fn end_to_end_block_with_three_draws() {
        let mut source = RecordingSource::new(vec![0xAB; 16]);
        let (result, workdir) = run_script("gen_ok.sh", 1000, &mut source);
        assert_eq!(result.unwrap(), "int main(){return 0;}");
        assert_eq!(
            source.events,
            vec![
                Event::Begin("block".to_string()),
                Event::Draw(31),
                Event::Draw(31),
                Event::Draw(31),
                Event::End,
            ]
        );
        assert!(!workdir.exists(), "working directory survived the session");
    }

    #[test]
    fn rand_response_is_the_big_endian_drawn_value() {
        // 31 bits of ff 34 56 78: the top bit is masked off.
        let mut source = BufferSource::new(vec![0xFF, 0x34, 0x56, 0x78]);
        let (result, workdir) = run_script("gen_echo.sh", 1000, &mut source);
        assert_eq!(result.unwrap(), "7f345678");
        assert!(!workdir.exists());
    }

    #[test]
    fn nested_regions_observed_in_generator_order() {
        let mut source = RecordingSource::new(vec![0x01; 16]);
        let (result, workdir) = run_script("gen_nested.sh", 1000, &mut source);
        result.unwrap();
        assert_eq!(
            source.events,
            vec![
                Event::Begin("fn".to_string()),
                Event::Draw(31),
                Event::Begin("stmt".to_string()),
                Event::Draw(31),
                Event::End,
                Event::End,
            ]
        );
        assert!(!workdir.exists());
    }

    #[test]
    fn unknown_command_is_a_protocol_violation() {
        let mut source = BufferSource::new(vec![]);
        let (result, workdir) = run_script("gen_garbage.sh", 1000, &mut source);
        match result {
            Err(SessionError::Protocol(detail)) => {
                assert!(detail.contains("FOO"), "detail lost the raw command: {detail}")
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
        assert!(!workdir.exists());
    }

    #[test]
    fn unbalanced_end_is_a_protocol_violation() {
        let mut source = RecordingSource::new(vec![]);
        let (result, workdir) = run_script("gen_unbalanced.sh", 1000, &mut source);
        match result {
            Err(SessionError::Protocol(detail)) => {
                assert!(detail.contains("END"), "unexpected detail: {detail}")
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
        // The source never saw the unmatched close.
        assert!(source.events.is_empty());
        assert!(!workdir.exists());
    }

    #[test]
    fn region_left_open_at_terminate_is_a_protocol_violation() {
        let mut source = BufferSource::new(vec![]);
        let (result, workdir) = run_script("gen_unclosed.sh", 1000, &mut source);
        match result {
            Err(SessionError::Protocol(detail)) => {
                assert!(detail.contains("still open"), "unexpected detail: {detail}")
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
        assert!(!workdir.exists());
    }

    #[test]
    fn exit_without_terminate_reports_the_exit_status() {
        let mut source = BufferSource::new(vec![]);
        let (result, workdir) = run_script("gen_exit1.sh", 1000, &mut source);
        match result {
            Err(SessionError::Subprocess(SupervisorError::NonZeroExit(desc))) => {
                assert!(desc.contains("code 1"), "unexpected description: {desc}")
            }
            other => panic!("expected Subprocess, got {other:?}"),
        }
        assert!(!workdir.exists());
    }

    #[test]
    fn hang_after_terminate_is_killed_within_the_bound() {
        let mut source = BufferSource::new(vec![]);
        let start = Instant::now();
        let (result, workdir) = run_script("gen_hang.sh", 200, &mut source);
        match result {
            Err(SessionError::Subprocess(SupervisorError::NonZeroExit(desc))) => {
                assert!(desc.contains("signal"), "unexpected description: {desc}")
            }
            other => panic!("expected Subprocess after forced kill, got {other:?}"),
        }
        assert!(
            start.elapsed() < Duration::from_secs(3),
            "shutdown took {:?}",
            start.elapsed()
        );
        assert!(!workdir.exists());
    }

    #[test]
    fn clean_terminate_without_artifact_is_artifact_missing() {
        let mut source = BufferSource::new(vec![]);
        let (result, workdir) = run_script("gen_no_artifact.sh", 1000, &mut source);
        assert!(matches!(result, Err(SessionError::ArtifactMissing { .. })));
        assert!(!workdir.exists());
    }

    #[test]
    fn missing_binary_fails_before_any_protocol_exchange() {
        let config = SessionConfig {
            binary: PathBuf::from("/nonexistent/generator_binary_12345"),
            args: vec![],
            shutdown_timeout: Duration::from_millis(100),
        };
        let session = Session::new(config).unwrap();
        let workdir = session.workdir().to_path_buf();
        let mut source = BufferSource::new(vec![]);
        assert!(matches!(
            session.generate(&mut source),
            Err(SessionError::Subprocess(SupervisorError::Spawn { .. }))
        ));
        assert!(!workdir.exists());
    }
}
