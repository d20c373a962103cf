//! The FIFO pair linking a session to its generator subprocess.
//!
//! Two unidirectional named pipes live inside the session's private
//! directory: the generator writes commands on one, the session writes
//! results on the other. Opening either end of a FIFO blocks until the peer
//! opens the opposite end, so both endpoints here are opened lazily on first
//! use — an eager open of both at construction time would deadlock against
//! the generator doing the same. The open order must match the peer's:
//! commands first (the session's first read), results second (the session's
//! first response).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming the commands FIFO for the generator.
pub const COMMANDS_ENV: &str = "TETHER_FIFO_COMMANDS";
/// Environment variable naming the results FIFO for the generator.
pub const RESULTS_ENV: &str = "TETHER_FIFO_RESULTS";

const COMMANDS_FIFO: &str = "commands.fifo";
const RESULTS_FIFO: &str = "results.fifo";

/// The two named-pipe special files of one session, created together.
pub struct ChannelPair {
    commands: PathBuf,
    results: PathBuf,
}

impl ChannelPair {
    /// Creates both FIFOs at deterministic sub-paths of `dir`.
    pub fn create(dir: &Path) -> Result<Self, io::Error> {
        let commands = dir.join(COMMANDS_FIFO);
        let results = dir.join(RESULTS_FIFO);
        mkfifo(&commands)?;
        mkfifo(&results)?;
        Ok(Self { commands, results })
    }

    pub fn commands_path(&self) -> &Path {
        &self.commands
    }

    pub fn results_path(&self) -> &Path {
        &self.results
    }

    /// Read endpoint for generator commands. Not yet opened.
    pub fn command_reader(&self) -> CommandChannel {
        CommandChannel {
            path: self.commands.clone(),
            file: None,
        }
    }

    /// Write endpoint for session results. Not yet opened.
    pub fn result_writer(&self) -> ResultChannel {
        ResultChannel {
            path: self.results.clone(),
            file: None,
        }
    }
}

#[cfg(unix)]
fn mkfifo(path: &Path) -> Result<(), io::Error> {
    use nix::sys::stat::Mode;
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn mkfifo(_path: &Path) -> Result<(), io::Error> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "named pipes require a unix platform",
    ))
}

/// Lazily-opened read end of the commands FIFO.
pub struct CommandChannel {
    path: PathBuf,
    file: Option<File>,
}

impl CommandChannel {
    /// Opens on first use; the open blocks until the generator opens the
    /// write end.
    pub fn reader(&mut self) -> Result<&mut File, io::Error> {
        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("command endpoint closed"))
    }

    /// Closes the endpoint. No-op when never opened or already closed.
    pub fn close(&mut self) {
        self.file.take();
    }
}

/// Lazily-opened write end of the results FIFO.
pub struct ResultChannel {
    path: PathBuf,
    file: Option<File>,
}

impl ResultChannel {
    /// Opens on first use; the open blocks until the generator opens the
    /// read end.
    pub fn writer(&mut self) -> Result<&mut File, io::Error> {
        if self.file.is_none() {
            let file = OpenOptions::new().write(true).open(&self.path)?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("result endpoint closed"))
    }

    /// Closes the endpoint. No-op when never opened or already closed.
    pub fn close(&mut self) {
        self.file.take();
    }
}
