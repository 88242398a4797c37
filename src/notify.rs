//! Outbound messages to a conversation.
//!
//! The desk renders plain text plus a keyboard of actions; a [`Notifier`]
//! delivers it and hands back the id the message got, so the next payload
//! can retract it.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use console::Style;

use crate::error::NotifyError;
use crate::model::{ConversationId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardAction {
    pub label: String,
    /// Opaque callback data sent back when the action is chosen.
    pub callback: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub text: String,
    pub keyboard: Vec<KeyboardAction>,
    /// Previously delivered messages to withdraw first.
    pub retract: Vec<MessageId>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, label: impl Into<String>, callback: impl Into<String>) -> Self {
        self.keyboard.push(KeyboardAction {
            label: label.into(),
            callback: callback.into(),
        });
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        conversation: &ConversationId,
        notification: Notification,
    ) -> Result<MessageId, NotifyError>;
}

/// Prints notifications to the terminal with coloured keyboards.
pub struct ConsoleNotifier {
    next_id: AtomicI64,
    dim: Style,
    cyan: Style,
    bold: Style,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::starting_at(MessageId(1))
    }

    /// Numbers messages from `first` on, for ids that must not repeat
    /// across runs.
    pub fn starting_at(first: MessageId) -> Self {
        Self {
            next_id: AtomicI64::new(first.0),
            dim: Style::new().dim(),
            cyan: Style::new().cyan(),
            bold: Style::new().bold(),
        }
    }

    pub fn render(&self, id: MessageId, notification: &Notification) -> String {
        let mut out = String::new();
        for retracted in &notification.retract {
            out.push_str(&format!(
                "{}\n",
                self.dim.apply_to(format!("(message #{} withdrawn)", retracted.0))
            ));
        }
        out.push_str(&format!("{}\n", self.bold.apply_to(format!("#{}", id.0))));
        out.push_str(&notification.text);
        if !notification.text.ends_with('\n') {
            out.push('\n');
        }
        for action in &notification.keyboard {
            out.push_str(&format!(
                "  {} {}\n",
                self.cyan.apply_to(format!("[{}]", action.label)),
                self.dim.apply_to(&action.callback)
            ));
        }
        out
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn deliver(
        &self,
        _conversation: &ConversationId,
        notification: Notification,
    ) -> Result<MessageId, NotifyError> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        print!("{}", self.render(id, &notification));
        Ok(id)
    }
}
