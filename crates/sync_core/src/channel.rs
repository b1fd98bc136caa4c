use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::protocol::Envelope;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{ProtocolError, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ChannelWriter {
    sink: SplitSink<WsStream, Message>,
}

pub struct ChannelReader {
    stream: SplitStream<WsStream>,
}

pub async fn connect(endpoint: &str) -> Result<(ChannelWriter, ChannelReader), TransportError> {
    let (ws_stream, _response) = connect_async(endpoint)
        .await
        .map_err(|err| TransportError::Connect(err.to_string()))?;
    let (sink, stream) = ws_stream.split();
    Ok((ChannelWriter { sink }, ChannelReader { stream }))
}

impl ChannelWriter {
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(envelope).map_err(|err| TransportError::Send(err.to_string()))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    pub async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

impl ChannelReader {
    /// Next parsed envelope. Malformed or non-text payloads are logged and
    /// skipped without closing the connection; `None` means the socket is gone.
    pub async fn next(&mut self) -> Option<Envelope> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => return Some(envelope),
                    Err(err) => {
                        warn!(error = %ProtocolError::Malformed(err), "discarding inbound frame");
                    }
                },
                Ok(Message::Binary(_)) => {
                    warn!(error = %ProtocolError::UnsupportedFrame, "discarding inbound frame");
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    debug!(error = %err, "websocket read failed");
                    return None;
                }
            }
        }
        None
    }
}
