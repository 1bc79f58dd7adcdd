use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{Address, FimpMessage};
use crate::{Error, Result};

/// The broker side of the adapter. Implementations own the MQTT connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, msg: &FimpMessage) -> Result<()>;
}

/// A message handed to the broker.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub topic: String,
    pub payload: FimpMessage,
}

/// Transport that forwards every message into an mpsc channel, for embedding
/// the adapter next to an existing MQTT client task.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn publish(&self, topic: &str, msg: &FimpMessage) -> Result<()> {
        self.tx
            .send(Outbound {
                topic: topic.to_string(),
                payload: msg.clone(),
            })
            .map_err(|_| Error::Transport("outbound channel closed".into()))
    }
}

/// Publishing front-end shared by the router and the supervisor. Routes
/// replies and mirrors traffic into the message log when one is configured.
pub struct Publisher {
    transport: Arc<dyn Transport>,
    log: Option<Mutex<MessageLogger>>,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            log: None,
        }
    }

    pub fn with_message_log(mut self, mode: MessageLogMode, path: &str) -> Result<Self> {
        self.log = Some(Mutex::new(MessageLogger::new(mode, path)?));
        Ok(self)
    }

    pub async fn publish(&self, address: &Address, msg: FimpMessage) -> Result<()> {
        self.send(&address.to_topic(), msg).await
    }

    /// Answer `request`: correlated by uid, sent to its `resp_to` when given,
    /// to `fallback` otherwise.
    pub async fn reply(
        &self,
        request: &FimpMessage,
        msg: FimpMessage,
        fallback: &Address,
    ) -> Result<()> {
        let msg = msg.in_reply_to(request);
        match request.response_topic() {
            Some(topic) => self.send(topic, msg).await,
            None => self.send(&fallback.to_topic(), msg).await,
        }
    }

    async fn send(&self, topic: &str, msg: FimpMessage) -> Result<()> {
        trace!(topic, msg_type = %msg.msg_type, "publishing");
        self.with_log(|log| log.log_outbound(topic, &msg));
        self.transport.publish(topic, &msg).await
    }

    pub(crate) fn log_inbound(&self, topic: &str, msg: &FimpMessage) {
        self.with_log(|log| log.log_inbound(topic, msg));
    }

    pub(crate) fn log_tree(&self, tree: &Value) {
        self.with_log(|log| log.log_tree(tree));
    }

    pub(crate) fn log_fetch_error(&self, error: &str) {
        self.with_log(|log| log.log_fetch_error(error));
    }

    fn with_log(&self, f: impl FnOnce(&mut MessageLogger)) {
        let Some(log) = &self.log else { return };
        match log.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(_) => warn!("message log lock poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SERVICE_SENSOR_TEMP;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn reply_prefers_resp_to() {
        let (transport, mut rx) = ChannelTransport::new();
        let publisher = Publisher::new(Arc::new(transport));
        let mut req = FimpMessage::null("cmd.sensor.get_report", SERVICE_SENSOR_TEMP);
        req.resp_to = Some("pt:j1/mt:rsp/rt:app/rn:tester/ad:1".into());
        let fallback = Address::device_event(SERVICE_SENSOR_TEMP, "40");

        publisher
            .reply(&req, FimpMessage::float("evt.sensor.report", SERVICE_SENSOR_TEMP, 21.0), &fallback)
            .await
            .unwrap();
        let out = rx.try_recv().unwrap();
        assert_eq!(out.topic, "pt:j1/mt:rsp/rt:app/rn:tester/ad:1");
        assert_eq!(out.payload.corid.as_deref(), Some(req.uid.as_str()));

        req.resp_to = None;
        publisher
            .reply(&req, FimpMessage::float("evt.sensor.report", SERVICE_SENSOR_TEMP, 21.0), &fallback)
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().topic, fallback.to_topic());
    }

    #[tokio::test]
    async fn closed_channel_is_transport_error() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        let publisher = Publisher::new(Arc::new(transport));
        let err = publisher
            .publish(&Address::adapter_event(), FimpMessage::null("evt.x", "glamox"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn outbound_traffic_is_logged() {
        let tmp = NamedTempFile::new().unwrap();
        let (transport, _rx) = ChannelTransport::new();
        let publisher = Publisher::new(Arc::new(transport))
            .with_message_log(MessageLogMode::Full, tmp.path().to_str().unwrap())
            .unwrap();
        publisher
            .publish(&Address::adapter_event(), FimpMessage::null("evt.x", "glamox"))
            .await
            .unwrap();
        let contents = std::fs::read_to_string(tmp.path()).unwrap();
        assert!(contents.contains("\"evt.x\""));
    }
}
