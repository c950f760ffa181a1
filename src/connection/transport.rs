// src/connection/transport.rs
use anyhow::{Context, Result, anyhow, bail};
use futures::{
    Sink, SinkExt, Stream, StreamExt,
    future::{self, BoxFuture, FutureExt},
    stream::BoxStream,
};
use log::debug;
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String>>;

/// An established connection, reduced to text frames in and out.
///
/// The stream ending (or yielding an error) means the connection is gone.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = anyhow::Error> + Send + 'static,
        St: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }
}

/// Opens transports to the realtime endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Transport>>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Transport>> {
        let endpoint = endpoint.to_string();

        async move {
            let (ws_stream, response) = connect_async(endpoint.as_str())
                .await
                .with_context(|| format!("Failed to open websocket to {endpoint}"))?;
            debug!("WebSocket handshake completed ({})", response.status());

            let (write, read) = ws_stream.split();

            let sink = write
                .sink_map_err(anyhow::Error::from)
                .with(|text: String| future::ready(Ok::<Message, anyhow::Error>(Message::text(text))));

            let stream = read.filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Some(Ok(text)),
                        Err(_) => {
                            debug!("Ignoring non UTF-8 binary frame ({} bytes)", bytes.len());
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("Close frame received: {frame:?}");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow::Error::from(e))),
                })
            });

            Ok(Transport::new(sink, stream))
        }
        .boxed()
    }
}

/// Derive the realtime endpoint from the HTTP API base: same host, `ws` for
/// `http` and `wss` for `https`.
pub fn endpoint_url(api_base_url: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(api_base_url).with_context(|| format!("Invalid API base URL {api_base_url}"))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => bail!("Unsupported scheme {other} in {api_base_url}"),
    };
    url.set_scheme(scheme)
        .map_err(|()| anyhow!("Cannot switch {api_base_url} to {scheme}"))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}
