//! Debounced emission of local typing signals.
//!
//! A burst of input sends one `typing` frame up front; every further input
//! re-arms the stop timer, and its expiry sends exactly one matching
//! `stop_typing`. A lost stop frame leaves a stale remote indicator until the
//! next explicit stop, which the protocol accepts as bounded staleness.

use std::time::Duration;

use shared::{
    domain::{GroupId, UserId},
    protocol::ClientFrame,
};
use tokio::{sync::mpsc, task::JoinHandle, time};

pub(crate) const TYPING_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Which conversation a typing burst addresses; picks the frame pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypingTarget {
    Direct(UserId),
    Group(GroupId),
}

impl TypingTarget {
    fn start_frame(self) -> ClientFrame {
        match self {
            TypingTarget::Direct(to) => ClientFrame::Typing { to },
            TypingTarget::Group(group) => ClientFrame::GroupTyping { group },
        }
    }

    fn stop_frame(self) -> ClientFrame {
        match self {
            TypingTarget::Direct(to) => ClientFrame::StopTyping { to },
            TypingTarget::Group(group) => ClientFrame::GroupStopTyping { group },
        }
    }
}

#[derive(Default)]
pub(crate) struct TypingCoordinator {
    target: Option<TypingTarget>,
    stop_timer: Option<JoinHandle<()>>,
}

impl TypingCoordinator {
    /// Record one local input change. Sends the start frame only when no
    /// debounce window is open for this target, then (re)arms the stop timer.
    pub(crate) fn input(
        &mut self,
        target: TypingTarget,
        outbound: &mpsc::UnboundedSender<ClientFrame>,
    ) {
        let window_open = self.target == Some(target)
            && self
                .stop_timer
                .as_ref()
                .is_some_and(|timer| !timer.is_finished());
        if !window_open {
            let _ = outbound.send(target.start_frame());
        }

        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
        self.target = Some(target);
        let outbound = outbound.clone();
        self.stop_timer = Some(tokio::spawn(async move {
            time::sleep(TYPING_DEBOUNCE).await;
            let _ = outbound.send(target.stop_frame());
        }));
    }

    /// Cancel any pending stop signal; used when the active conversation
    /// changes or the session ends.
    pub(crate) fn reset(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
        self.target = None;
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
