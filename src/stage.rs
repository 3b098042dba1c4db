use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::storage::Storage;
use crate::types::error::S3ObjectsError;
use crate::types::token::PipelineCancellationToken;

/// Result of sending an item to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// Each stage reads `In` items from `receiver` and writes `Out` items to
/// `sender`. A stage that starts a chain (a lister) has no `receiver`.
pub struct Stage<In, Out> {
    pub config: Config,
    pub target: Storage,
    pub receiver: Option<Receiver<In>>,
    pub sender: Option<Sender<Out>>,
    pub cancellation_token: PipelineCancellationToken,
}

impl<In, Out> Stage<In, Out> {
    pub fn new(
        config: Config,
        target: Storage,
        receiver: Option<Receiver<In>>,
        sender: Option<Sender<Out>>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            config,
            target,
            receiver,
            sender,
            cancellation_token,
        }
    }

    pub fn receiver(&self) -> Result<&Receiver<In>> {
        self.receiver
            .as_ref()
            .ok_or_else(|| anyhow!(S3ObjectsError::Pipeline("stage has no receiver.".into())))
    }

    pub fn sender(&self) -> Result<&Sender<Out>> {
        self.sender
            .as_ref()
            .ok_or_else(|| anyhow!(S3ObjectsError::Pipeline("stage has no sender.".into())))
    }

    /// Send an item to the next stage via the sender channel.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// (e.g. due to cancellation), allowing the caller to exit gracefully.
    pub async fn send(&self, item: Out) -> Result<SendResult> {
        let sender = self.sender()?;
        let result = sender
            .send(item)
            .await
            .map_err(|_| anyhow!("async_channel::Sender::send() failed."));

        if let Err(e) = result {
            return if !sender.is_closed() {
                Err(e)
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Check if the sender channel has been closed by the receiver.
    pub fn is_channel_closed(&self) -> bool {
        self.sender.as_ref().is_none_or(Sender::is_closed)
    }

    /// Close the downstream channel so the next stage sees end-of-input.
    pub fn close(&self) {
        if let Some(sender) = &self.sender {
            sender.close();
        }
    }
}
