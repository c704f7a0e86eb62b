// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stand-in chat port for headless deployments.
//!
//! Real deployments inject a platform adapter (Telegram, WhatsApp) here.
//! This one logs the traffic so the engine can run end-to-end behind the
//! HTTP API alone.

use async_trait::async_trait;
use bytes::Bytes;

use vinhub::port::{ChatPort, SubscriberTarget};

pub struct LoggingPort;

#[async_trait]
impl ChatPort for LoggingPort {
    async fn edit_progress(&self, target: &SubscriberTarget, text: &str) -> anyhow::Result<()> {
        tracing::info!(chat = target.chat_id, message = target.message_id, "progress: {}", text.replace('\n', " | "));
        Ok(())
    }

    async fn deliver_pdf(
        &self,
        target: &SubscriberTarget,
        filename: &str,
        pdf: &Bytes,
    ) -> anyhow::Result<()> {
        tracing::info!(
            chat = target.chat_id,
            message = target.message_id,
            filename,
            bytes = pdf.len(),
            "pdf delivered"
        );
        Ok(())
    }
}
