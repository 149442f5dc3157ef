//! SMTP session state machine.
//!
//! Pure transition logic: given the current state and one client line,
//! decide the next state and the reply (if any). No I/O happens here.

/// Canned replies sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `220 Awesome SMTP server`
    Greeting,
    /// `354 Intermediate`
    Intermediate,
    /// `250 OK`
    Ok,
}

impl Reply {
    /// Wire bytes of this reply, CRLF included.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Reply::Greeting => b"220 Awesome SMTP server\r\n",
            Reply::Intermediate => b"354 Intermediate\r\n",
            Reply::Ok => b"250 OK\r\n",
        }
    }
}

/// Per-connection session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connection accepted, greeting not yet sent.
    #[default]
    Greeting,
    /// Each line gets acknowledged.
    Command,
    /// Inside a DATA body; lines are swallowed until a lone `.`.
    DataCapture,
    /// Terminal.
    Closed,
}

/// Outcome of feeding one event to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub reply: Option<Reply>,
}

impl Transition {
    fn to(next: SessionState, reply: Option<Reply>) -> Self {
        Transition { next, reply }
    }
}

impl SessionState {
    /// Send the greeting. Only meaningful from `Greeting`; other states are
    /// left untouched.
    pub fn greet(self) -> Transition {
        match self {
            SessionState::Greeting => {
                Transition::to(SessionState::Command, Some(Reply::Greeting))
            }
            other => Transition::to(other, None),
        }
    }

    /// Advance on one client line. `line` may still carry its terminator.
    ///
    /// `DATA`, `.` and `QUIT` are matched in every open state, including
    /// inside a DATA body. A line seen before the greeting is handled as in
    /// `Command`. Once `Closed`, nothing changes.
    pub fn on_line(self, line: &[u8]) -> Transition {
        if self == SessionState::Closed {
            return Transition::to(SessionState::Closed, None);
        }

        match strip_terminator(line) {
            b"DATA" => Transition::to(SessionState::DataCapture, Some(Reply::Intermediate)),
            b"." => Transition::to(SessionState::Command, Some(Reply::Ok)),
            b"QUIT" => Transition::to(SessionState::Closed, None),
            _ if self == SessionState::DataCapture => Transition::to(self, None),
            _ => Transition::to(SessionState::Command, Some(Reply::Ok)),
        }
    }

    /// The peer went away or the stream failed.
    pub fn close(self) -> Transition {
        Transition::to(SessionState::Closed, None)
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

/// Strip a trailing `\n` and then a trailing `\r`, if present.
pub fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
