pub mod channel;
pub mod codec;
pub mod config;
pub mod session;
pub mod source;
pub mod supervisor;

pub use channel::{COMMANDS_ENV, ChannelPair, RESULTS_ENV};
pub use codec::{Command, FrameError};
pub use config::{GeneratorSettings, TetherConfig};
pub use session::{Session, SessionConfig, SessionError};
pub use source::{BitSource, BufferSource, RngSource};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
