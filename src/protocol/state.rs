//! Management channel state for one executable run.

use crate::protocol::event::EventType;

/// `Initial -> Connected -> Running -> Succeeded | Failed`
///
/// A channel that closes before reaching a terminal state counts as failed;
/// see [`ChannelState::close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Initial,
    Connected,
    Running,
    Succeeded,
    Failed,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Management connection accepted.
    pub fn connected(self) -> Self {
        match self {
            Self::Initial => Self::Connected,
            other => other,
        }
    }

    pub fn apply(self, event: &EventType) -> Self {
        match (self, event) {
            (state, _) if state.is_terminal() => state,
            (Self::Connected, EventType::Init) => Self::Running,
            (Self::Running, EventType::Done) => Self::Succeeded,
            (Self::Connected | Self::Running, EventType::Error) => Self::Failed,
            (state, _) => state,
        }
    }

    /// Stream closed: anything short of success is a failure.
    pub fn close(self) -> Self {
        match self {
            Self::Succeeded => Self::Succeeded,
            _ => Self::Failed,
        }
    }
}
