//! Scroll behavior for a chat screen.
//!
//! The rule: the first history load lands the user on the newest message
//! instantly, and after that the view only follows new arrivals while the
//! user is already near the bottom. A user scrolled up reading older
//! messages is never yanked back down.

/// What the rendering layer should do with the scroll position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// Leave the scroll position alone.
    Stay,
    /// Snap to the newest message with no animation.
    JumpToLatest,
    /// Animate down to the newest message.
    ScrollToLatest,
}

/// Tracks where the user's viewport is relative to the newest message.
#[derive(Debug, Default)]
pub struct ViewState {
    initial_load_done: bool,
    near_bottom: bool,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the rendering layer whenever the user scrolls.
    pub fn set_near_bottom(&mut self, near_bottom: bool) {
        self.near_bottom = near_bottom;
    }

    pub fn near_bottom(&self) -> bool {
        self.near_bottom
    }

    /// A history page finished loading. Only the very first load moves the
    /// viewport; prepended older pages must not disturb it.
    pub fn on_history_loaded(&mut self) -> ScrollAction {
        if self.initial_load_done {
            return ScrollAction::Stay;
        }
        self.initial_load_done = true;
        self.near_bottom = true;
        ScrollAction::JumpToLatest
    }

    /// A new message arrived live. The view follows it only for the
    /// sender's own messages or while already near the bottom.
    pub fn on_message_arrived(&mut self, own_message: bool) -> ScrollAction {
        if own_message || self.near_bottom {
            self.near_bottom = true;
            ScrollAction::ScrollToLatest
        } else {
            ScrollAction::Stay
        }
    }
}
