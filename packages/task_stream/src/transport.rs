use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::channel::{CLOSE_ABNORMAL, Connection, Connector, Inbound};
use crate::error::ChannelError;

/// WebSocket transport over tokio-tungstenite. Protocol-level ping/pong
/// frames are answered by tungstenite itself and never surface here.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, ChannelError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(ChannelError::from_tungstenite)?;
        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .sink_map_err(ChannelError::from_tungstenite)
            .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text.into()))));

        let stream = ws_read.filter_map(|msg| future::ready(to_inbound(msg)));

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_inbound(msg: Result<Message, tungstenite::Error>) -> Option<Result<Inbound, ChannelError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
        Ok(Message::Close(frame)) => {
            let (code, reason) = match frame {
                Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                None => (CLOSE_ABNORMAL, String::new()),
            };
            Some(Ok(Inbound::Close { code, reason }))
        }
        // Binary frames are not part of the protocol; ping/pong/raw frames
        // are transport-internal
        Ok(_) => None,
        Err(e) => Some(Err(ChannelError::from_tungstenite(e))),
    }
}
