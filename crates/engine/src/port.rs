// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter seam between the engine and chat channels.
//!
//! The engine drives progress edits and PDF delivery through this trait;
//! each chat platform (Telegram, WhatsApp, a test harness) supplies its own
//! implementation.  The engine never learns platform specifics.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Where a subscriber's progress message lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberTarget {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Outbound operations a chat adapter must provide.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Replace the text of a subscriber's progress message.
    async fn edit_progress(&self, target: &SubscriberTarget, text: &str) -> anyhow::Result<()>;

    /// Send the finished PDF to a subscriber's chat.
    async fn deliver_pdf(
        &self,
        target: &SubscriberTarget,
        filename: &str,
        pdf: &Bytes,
    ) -> anyhow::Result<()>;
}
