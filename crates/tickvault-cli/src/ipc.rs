//! Persistent service transport.
//!
//! Frames are a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON. A request frame holds `{command, parameters}`; the response
//! frame holds `{success, data, error}` where `data` is the full envelope and
//! `error` repeats its error body. Each connection is served by its own task
//! and carries no state between requests.

use std::future::Future;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tickvault_core::{Envelope, EnvelopeError, ErrorCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::commands::failure;
use crate::service::{rejection, Request, Service};

pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    pub data: Envelope<Value>,
    pub error: Option<EnvelopeError>,
}

impl From<Envelope<Value>> for IpcResponse {
    fn from(envelope: Envelope<Value>) -> Self {
        Self {
            success: envelope.ok,
            error: envelope.error.clone(),
            data: envelope,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Payload(Vec<u8>),
    /// Declared length above `MAX_FRAME_BYTES`; the body is not read.
    Oversized(usize),
    /// Peer closed the connection between frames.
    Closed,
}

pub async fn read_frame<R>(reader: &mut R) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(error) if error.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
        Err(error) => return Err(error),
    };
    if len > MAX_FRAME_BYTES {
        return Ok(Frame::Oversized(len));
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Frame::Payload(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_BYTES)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds {MAX_FRAME_BYTES}", payload.len()),
            )
        })?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(service: Arc<Service>, listener: TcpListener, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    tracing::debug!(%peer, "connection opened");
                    if let Err(error) = handle_connection(&service, stream).await {
                        tracing::warn!(%peer, %error, "connection closed with error");
                    }
                });
            }
            () = &mut shutdown => {
                tracing::info!("ipc service shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(service: &Arc<Service>, stream: TcpStream) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    loop {
        let response = match read_frame(&mut reader).await? {
            Frame::Closed => return Ok(()),
            Frame::Oversized(len) => {
                let envelope = rejection(failure(
                    ErrorCode::InvalidArguments,
                    format!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"),
                ));
                send(&mut writer, envelope).await?;
                return Ok(());
            }
            Frame::Payload(payload) => respond(service, &payload).await,
        };
        send(&mut writer, response).await?;
    }
}

async fn respond(service: &Arc<Service>, payload: &[u8]) -> Envelope<Value> {
    match serde_json::from_slice::<Request>(payload) {
        Ok(request) => service.handle_isolated(request).await,
        Err(error) => rejection(
            failure(ErrorCode::InvalidArguments, format!("malformed request frame: {error}"))
                .with_hint("send {\"command\": ..., \"parameters\": {...}}"),
        ),
    }
}

async fn send<W>(writer: &mut W, envelope: Envelope<Value>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = serde_json::to_vec(&IpcResponse::from(envelope))?;
    write_frame(writer, &bytes).await
}
