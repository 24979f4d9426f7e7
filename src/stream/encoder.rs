//! 事件编码：每个 ProtocolEvent 一帧
//!
//! NDJSON：`<json>\n`；SSE：`data: <json>\n\n`。

use serde::Deserialize;

use crate::stream::ProtocolEvent;

/// 帧格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    #[default]
    Ndjson,
    Sse,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventEncoder {
    framing: Framing,
}

impl EventEncoder {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn ndjson() -> Self {
        Self::new(Framing::Ndjson)
    }

    pub fn sse() -> Self {
        Self::new(Framing::Sse)
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn content_type(&self) -> &'static str {
        match self.framing {
            Framing::Ndjson => "application/x-ndjson; charset=utf-8",
            Framing::Sse => "text/event-stream",
        }
    }

    pub fn encode(&self, event: &ProtocolEvent) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(event)?;
        Ok(match self.framing {
            Framing::Ndjson => format!("{json}\n"),
            Framing::Sse => format!("data: {json}\n\n"),
        })
    }

    pub fn encode_all(&self, events: &[ProtocolEvent]) -> Result<String, serde_json::Error> {
        events.iter().map(|ev| self.encode(ev)).collect()
    }
}
