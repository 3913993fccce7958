use crate::metadata::Direction;
use crate::session::SessionHandle;
use failure::Fail;

/// Errors raised by this crate that callers may want to tell apart. Everything is returned as a
/// `failure::Error`; use `downcast_ref::<UsrpError>()` to recover the kind.
#[derive(Debug, Fail)]
pub enum UsrpError {
    /// Bad parameters. The session or run was not started
    #[fail(display = "Invalid configuration: {}", _0)]
    Config(String),
    #[fail(display = "Couldn't lock LO on {} channel {}", direction, channel)]
    LoUnlocked { direction: Direction, channel: usize },
    /// Unrecoverable receive error reported by the hardware
    #[fail(display = "Receiver error {}", _0)]
    Receiver(String),
    #[fail(display = "No session with handle {}", _0)]
    InvalidHandle(SessionHandle),
    #[fail(display = "{} worker panicked", _0)]
    WorkerPanicked(&'static str),
}

impl UsrpError {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        UsrpError::Config(msg.into())
    }
}
