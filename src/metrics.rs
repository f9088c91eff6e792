//! Prometheus metrics for the live chat: open sockets, messages fanned out, and delivery failures.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ws_connections: IntGauge,
    pub chat_messages: IntCounter,
    pub malformed_payloads: IntCounter,
    pub send_failures: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let ws_connections = IntGauge::new("chat_ws_connections", "Open chat WebSocket connections")?;
        let chat_messages = IntCounter::new("chat_messages_total", "Chat messages accepted")?;
        let malformed_payloads = IntCounter::new(
            "chat_malformed_payloads_total",
            "Inbound chat payloads rejected",
        )?;
        let send_failures = IntCounter::new(
            "chat_ws_send_failures_total",
            "Frames dropped because a connection buffer was full or closed",
        )?;
        registry.register(Box::new(ws_connections.clone()))?;
        registry.register(Box::new(chat_messages.clone()))?;
        registry.register(Box::new(malformed_payloads.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;
        Ok(Self {
            registry,
            ws_connections,
            chat_messages,
            malformed_payloads,
            send_failures,
        })
    }

    /// Text exposition format for `/metrics`.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
