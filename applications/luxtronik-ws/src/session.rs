//! One websocket session with the controller.
//!
//! The controller answers every text command with one complete XML document:
//! `LOGIN;<password>` yields the navigation tree and `GET;<id>` yields the
//! content of one navigation node. Requests are strictly sequential.

use crate::error::{AppError, Result};
use crate::xml;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use xmltree::Element;

pub const DEFAULT_PORT: u16 = 8214;
pub const SUBPROTOCOL: &str = "Lux_WS";

const LOGIN_ROOT_PREFIX: &str = "<Navigation id=";
/// A rejected password still yields a navigation tree, just a near-empty one.
const MIN_NAVIGATION_CHILDREN: usize = 5;

pub const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Session {
    ws: WsStream,
    host: String,
}

impl Session {
    /// Connect and log in. The socket is closed again if login fails.
    pub async fn connect(host: &str, port: u16, password: &str) -> Result<(Self, Element)> {
        let url = format!("ws://{host}:{port}/");
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| AppError::Connect(format!("invalid address {url}: {e}")))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| AppError::Connect(format!("{url}: {e}")))?;
        debug!(host = %host, port, "websocket connected");

        let mut session = Self {
            ws,
            host: host.to_string(),
        };
        match session.login(password).await {
            Ok(navigation) => Ok((session, navigation)),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn login(&mut self, password: &str) -> Result<Element> {
        self.send(format!("LOGIN;{password}")).await?;
        let reply = self.recv_text().await?;
        let navigation = validate_login_response(&reply)?;
        debug!(host = %self.host, "login accepted");
        Ok(navigation)
    }

    /// Fetch the content document of one navigation node.
    pub async fn get(&mut self, id: &str) -> Result<Element> {
        self.send(format!("GET;{id}")).await?;
        let reply = self.recv_text().await?;
        xml::parse(&reply)
    }

    /// Send a close frame and drain until the controller answers it or the
    /// stream ends, waiting at most `CLOSE_DRAIN_TIMEOUT`.
    pub async fn close(mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(host = %self.host, error = %e, "websocket close failed");
            return;
        }
        let drain = async {
            while let Some(Ok(msg)) = self.ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, drain).await.is_err() {
            debug!(host = %self.host, "no close reply from controller");
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<String> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map_err(|e| AppError::UnexpectedResponse(format!("non-utf8 reply: {e}")))
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(AppError::Closed(format!("controller closed session: {frame:?}")))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(host = %self.host, error = %e, "websocket receive failed");
                    return Err(e.into());
                }
                None => return Err(AppError::Closed("stream ended".into())),
            }
        }
    }
}

/// Check a login reply and parse it into the navigation tree.
pub fn validate_login_response(reply: &str) -> Result<Element> {
    if !reply.starts_with(LOGIN_ROOT_PREFIX) {
        return Err(AppError::UnexpectedResponse(format!(
            "login response is unknown: {}",
            reply.chars().take(40).collect::<String>()
        )));
    }
    let root = xml::parse(reply)?;
    let children = xml::element_count(&root);
    if children < MIN_NAVIGATION_CHILDREN {
        return Err(AppError::InvalidAuth(format!(
            "wrong password ({children} navigation entries)"
        )));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn navigation(children: usize) -> String {
        let items: String = (0..children)
            .map(|i| format!(r#"<item id="0x{i:x}"><name>n{i}</name></item>"#))
            .collect();
        format!(r#"<Navigation id="0x1">{items}</Navigation>"#)
    }

    #[test]
    fn test_login_accepted_with_five_children() {
        let root = validate_login_response(&navigation(5)).unwrap();
        assert_eq!(xml::element_count(&root), 5);
        assert!(validate_login_response(&navigation(9)).is_ok());
    }

    #[test]
    fn test_login_rejected_below_five_children() {
        for n in 0..5 {
            let err = validate_login_response(&navigation(n)).unwrap_err();
            assert!(matches!(err, AppError::InvalidAuth(_)), "{n} children");
        }
    }

    #[test]
    fn test_unknown_root_is_unexpected_response() {
        let err = validate_login_response("<Content><item/></Content>").unwrap_err();
        assert!(matches!(err, AppError::UnexpectedResponse(_)));
    }
}
