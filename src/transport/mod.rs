//! Subprocess transport for hook commands.

pub mod local;

pub use local::exec_shell;

/// Where a streamed command's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Forward to this process's stdout/stderr
    Forward,
    /// Discard
    Suppress,
}

impl Stream {
    pub fn from_suppress(suppress: bool) -> Self {
        if suppress {
            Self::Suppress
        } else {
            Self::Forward
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_stream_from_suppress() {
        assert_eq!(Stream::from_suppress(true), Stream::Suppress);
        assert_eq!(Stream::from_suppress(false), Stream::Forward);
    }
}
