// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Per-server event stream
//!
//! Transfer status changes and human readable console lines are published on
//! a broadcast channel that anyone watching the server (a console websocket,
//! a test) can subscribe to. Publishing never blocks and never fails; with
//! no subscribers the event is dropped.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use transfer_types::TransferStatus;

/// Buffered events per subscriber before the slowest starts lagging
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadEvent {
    TransferStatus(TransferStatus),
    TransferLogs(String),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkloadEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkloadEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: WorkloadEvent) {
        let _ = self.sender.send(event);
    }

    pub fn publish_status(&self, status: TransferStatus) {
        self.publish(WorkloadEvent::TransferStatus(status));
    }
}

/// Which node a console line is written from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Source,
    Target,
}

impl NodeRole {
    fn label(self) -> &'static str {
        match self {
            NodeRole::Source => "Source Node",
            NodeRole::Target => "Target Node",
        }
    }
}

/// Render a transfer console line: a dimmed RFC 1123 timestamp, then the
/// node label in bold yellow, then the message.
pub fn format_transfer_log(role: NodeRole, message: &str, at: DateTime<Utc>) -> String {
    format!(
        "\x1b[0;90m{}\x1b[0m \x1b[1;33m[{}]:\x1b[0m {}",
        at.format("%a, %d %b %Y %H:%M:%S GMT"),
        role.label(),
        message
    )
}

/// Console writer bound to one server's event stream
#[derive(Debug, Clone)]
pub struct TransferLog {
    events: EventBus,
    role: NodeRole,
}

impl TransferLog {
    pub fn new(events: EventBus, role: NodeRole) -> Self {
        Self { events, role }
    }

    pub fn send(&self, message: &str) {
        self.events.publish(WorkloadEvent::TransferLogs(format_transfer_log(
            self.role,
            message,
            Utc::now(),
        )));
    }
}
