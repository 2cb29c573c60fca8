//! Scripted in-memory transport.
//!
//! `LoopbackTerminal` records every command it is given and answers queries
//! from a queue of canned replies, so drivers built on [`ScpiTransport`] can be
//! exercised without an instrument attached.

use crate::scpi_terminal::{ScpiTransport, TerminalError};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct LoopbackTerminal {
    sent: Vec<String>,
    replies: VecDeque<Vec<u8>>,
    failing: Vec<String>,
}

impl LoopbackTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a textual reply (a line terminator is appended).
    pub fn reply(mut self, text: &str) -> Self {
        self.push_reply(text);
        self
    }

    /// Queue a raw reply, sent back verbatim.
    pub fn reply_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.push_bytes(bytes);
        self
    }

    /// Make every command starting with `prefix` fail with a timeout.
    pub fn fail_on(mut self, prefix: &str) -> Self {
        self.push_failure(prefix);
        self
    }

    pub fn push_failure(&mut self, prefix: &str) {
        self.failing.push(prefix.to_string());
    }

    /// Stop failing commands previously registered with [`fail_on`](Self::fail_on).
    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    pub fn push_reply(&mut self, text: &str) {
        let mut line = text.as_bytes().to_vec();
        line.push(b'\n');
        self.replies.push_back(line);
    }

    pub fn push_bytes(&mut self, bytes: impl Into<Vec<u8>>) {
        self.replies.push_back(bytes.into());
    }

    /// Every command seen so far, in order.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    fn record(&mut self, command: &str) -> Result<(), TerminalError> {
        self.sent.push(command.to_string());
        if self.failing.iter().any(|prefix| command.starts_with(prefix.as_str())) {
            return Err(TerminalError::Timeout {
                command: command.to_string(),
                received: String::new(),
            });
        }
        Ok(())
    }

    fn next_reply(&mut self, command: &str) -> Result<Vec<u8>, TerminalError> {
        self.replies.pop_front().ok_or_else(|| TerminalError::Timeout {
            command: command.to_string(),
            received: String::new(),
        })
    }
}

impl ScpiTransport for LoopbackTerminal {
    fn write(&mut self, command: &str) -> Result<(), TerminalError> {
        self.record(command)
    }

    fn query_text(&mut self, command: &str) -> Result<String, TerminalError> {
        self.record(command)?;
        let reply = String::from_utf8(self.next_reply(command)?)?;
        Ok(reply.trim_end_matches(['\r', '\n']).to_string())
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TerminalError> {
        self.record(command)?;
        self.next_reply(command)
    }
}
