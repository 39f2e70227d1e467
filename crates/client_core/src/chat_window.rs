use shared::domain::ConversationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatWindowState {
    Closed,
    Open {
        conversation: ConversationKey,
        minimized: bool,
    },
}

/// Which conversation has the single chat window, and whether the user can
/// currently see it.
#[derive(Debug, Clone)]
pub struct ChatWindow {
    state: ChatWindowState,
    focused: bool,
}

impl Default for ChatWindow {
    fn default() -> Self {
        Self {
            state: ChatWindowState::Closed,
            focused: true,
        }
    }
}

impl ChatWindow {
    pub fn state(&self) -> ChatWindowState {
        self.state
    }

    pub fn active(&self) -> Option<ConversationKey> {
        match self.state {
            ChatWindowState::Closed => None,
            ChatWindowState::Open { conversation, .. } => Some(conversation),
        }
    }

    pub fn is_minimized(&self) -> bool {
        matches!(self.state, ChatWindowState::Open { minimized: true, .. })
    }

    /// Opens (or switches to) `conversation`, always expanded.
    pub fn open(&mut self, conversation: ConversationKey) {
        self.state = ChatWindowState::Open {
            conversation,
            minimized: false,
        };
    }

    pub fn toggle_minimize(&mut self) {
        if let ChatWindowState::Open { minimized, .. } = &mut self.state {
            *minimized = !*minimized;
        }
    }

    pub fn close(&mut self) {
        self.state = ChatWindowState::Closed;
    }

    pub fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    /// True when `conversation` is open, expanded and the window has focus.
    pub fn is_visible(&self, conversation: ConversationKey) -> bool {
        self.focused
            && self.state
                == ChatWindowState::Open {
                    conversation,
                    minimized: false,
                }
    }
}
