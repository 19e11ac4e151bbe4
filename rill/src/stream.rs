// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, OwnedTrustAnchor, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::connect_options::{
    ConnectType, MqttsConnect, TlsType, WsConnect, WssConnect, WEBSOCKET_SUB_PROTOCOL,
};
use crate::error::{Error, ErrorKind};

/// One variant per transport stack. The engine treats them uniformly:
/// ordered bytes in, ordered bytes out.
pub(crate) enum Stream {
    /// Not connected. All I/O operations fail with `NotConnected`.
    None,
    Mqtt(TcpStream),
    Mqtts(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Mqtt(..) => f.write_str("Mqtt"),
            Self::Mqtts(..) => f.write_str("Mqtts"),
            Self::Ws(..) => f.write_str("Ws"),
            Self::Wss(..) => f.write_str("Wss"),
        }
    }
}

impl Stream {
    pub async fn connect(connect_type: &ConnectType) -> Result<Self, Error> {
        match connect_type {
            ConnectType::Mqtt(mqtt_connect) => {
                let socket = TcpStream::connect(mqtt_connect.address).await?;
                Ok(Self::Mqtt(socket))
            }
            ConnectType::Mqtts(mqtts_connect) => Self::new_mqtts(mqtts_connect).await,
            ConnectType::Ws(ws_connect) => Self::new_ws(ws_connect).await,
            ConnectType::Wss(wss_connect) => Self::new_wss(wss_connect).await,
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        !matches!(self, Self::None)
    }

    async fn new_mqtts(mqtts_connect: &MqttsConnect) -> Result<Self, Error> {
        let socket = Self::tls_handshake(
            mqtts_connect.address,
            &mqtts_connect.domain,
            &mqtts_connect.tls_type,
        )
        .await?;
        Ok(Self::Mqtts(Box::new(socket)))
    }

    async fn new_ws(ws_connect: &WsConnect) -> Result<Self, Error> {
        let socket = TcpStream::connect(ws_connect.address).await?;
        let url = format!("ws://{}{}", ws_connect.host, ws_connect.path);
        let request = Self::upgrade_request(&url)?;
        let (ws_stream, _response) = tokio_tungstenite::client_async(request, socket).await?;
        Ok(Self::Ws(Box::new(ws_stream)))
    }

    async fn new_wss(wss_connect: &WssConnect) -> Result<Self, Error> {
        let socket = Self::tls_handshake(
            wss_connect.address,
            &wss_connect.domain,
            &wss_connect.tls_type,
        )
        .await?;
        let url = format!("wss://{}{}", wss_connect.domain, wss_connect.path);
        let request = Self::upgrade_request(&url)?;
        let (ws_stream, _response) = tokio_tungstenite::client_async(request, socket).await?;
        Ok(Self::Wss(Box::new(ws_stream)))
    }

    fn upgrade_request(url: &str) -> Result<tungstenite::handshake::client::Request, Error> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WEBSOCKET_SUB_PROTOCOL),
        );
        Ok(request)
    }

    async fn tls_handshake(
        address: std::net::SocketAddr,
        domain: &str,
        tls_type: &TlsType,
    ) -> Result<TlsStream<TcpStream>, Error> {
        let connector = Self::tls_connector(tls_type)?;
        let domain = rustls::ServerName::try_from(domain).map_err(|_| {
            Error::from_string(
                ErrorKind::InvalidParameter,
                format!("Invalid tls domain name: {domain}"),
            )
        })?;
        let socket = TcpStream::connect(address).await?;
        connector
            .connect(domain, socket)
            .await
            .map_err(Into::into)
    }

    fn tls_connector(tls_type: &TlsType) -> Result<TlsConnector, Error> {
        let mut root_store = RootCertStore::empty();
        match tls_type {
            TlsType::CASigned => {
                root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                }));
            }
            TlsType::SelfSigned(root_ca_pem) => {
                let root_ca_fd = File::open(root_ca_pem)?;
                let mut reader = BufReader::new(root_ca_fd);
                for cert in rustls_pemfile::certs(&mut reader)? {
                    root_store.add(&rustls::Certificate(cert)).map_err(|err| {
                        Error::from_string(
                            ErrorKind::CertError,
                            format!("Failed to load root ca cert: {err}"),
                        )
                    })?;
                }
            }
        }

        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Ok(TlsConnector::from(Arc::new(config)))
    }

    /// Read more bytes from the transport into `buf`.
    ///
    /// Returns the number of bytes appended; 0 means the peer closed
    /// the connection. WebSocket variants append exactly one binary
    /// frame; text and other data frames are a protocol failure.
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize, Error> {
        match self {
            Self::None => Err(Error::new(ErrorKind::NotConnected, "Stream is closed")),
            Self::Mqtt(socket) => socket.read_buf(buf).await.map_err(Into::into),
            Self::Mqtts(socket) => socket.read_buf(buf).await.map_err(Into::into),
            Self::Ws(ws_stream) => Self::read_frame(ws_stream, buf).await,
            Self::Wss(ws_stream) => Self::read_frame(ws_stream, buf).await,
        }
    }

    async fn read_frame<S>(ws_stream: &mut S, buf: &mut BytesMut) -> Result<usize, Error>
    where
        S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            match ws_stream.next().await {
                None => return Ok(0),
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Message::Binary(data))) => {
                    buf.extend_from_slice(&data);
                    return Ok(data.len());
                }
                Some(Ok(Message::Close(_))) => return Ok(0),
                // Transport level ping/pong frames are invisible to the
                // protocol engine.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(msg)) => {
                    return Err(Error::from_string(
                        ErrorKind::ServerMessageFailure,
                        format!("Unexpected websocket frame: {msg:?}"),
                    ));
                }
            }
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        match self {
            Self::None => Err(Error::new(ErrorKind::NotConnected, "Stream is closed")),
            Self::Mqtt(socket) => socket.write_all(buf).await.map_err(Into::into),
            Self::Mqtts(socket) => socket.write_all(buf).await.map_err(Into::into),
            Self::Ws(ws_stream) => ws_stream
                .send(Message::Binary(buf.to_vec()))
                .await
                .map_err(Into::into),
            Self::Wss(ws_stream) => ws_stream
                .send(Message::Binary(buf.to_vec()))
                .await
                .map_err(Into::into),
        }
    }

    /// Close the transport. Errors are ignored; the session is over
    /// either way.
    pub async fn shutdown(&mut self) {
        match self {
            Self::None => (),
            Self::Mqtt(socket) => {
                let _ret = socket.shutdown().await;
            }
            Self::Mqtts(socket) => {
                let _ret = socket.shutdown().await;
            }
            Self::Ws(ws_stream) => {
                let _ret = ws_stream.as_mut().close(None).await;
            }
            Self::Wss(ws_stream) => {
                let _ret = ws_stream.as_mut().close(None).await;
            }
        }
    }
}
