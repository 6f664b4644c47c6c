//! A single client connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use market::Market;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::JsonLineCodec;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, ServerError};
use crate::protocol::{MALFORMED_ACTION, Response};

/// Reads requests from `stream` until it closes, answering each in order.
///
/// Cancelling `shutdown` stops the loop between requests; a request already
/// being handled is answered first. An oversized frame is answered with a
/// protocol error and closes the connection.
#[tracing::instrument(skip(stream, market, shutdown))]
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    market: Arc<Market>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, JsonLineCodec::new(max_frame_bytes));
    let mut dispatcher = Dispatcher::new(market);
    tracing::debug!("client connected");

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("closing connection for shutdown");
                break;
            }
            frame = framed.next() => frame,
        };

        match frame {
            Some(Ok(line)) => {
                let response = dispatcher.handle_line(&line).await;
                framed.send(response).await?;
            }
            Some(Err(ServerError::FrameTooLong { max })) => {
                tracing::warn!(max, "request line too long, closing connection");
                let err = domain::DomainError::Protocol(format!(
                    "Request exceeds {max} bytes."
                ));
                // Best effort; the connection closes either way.
                let _ = framed.send(Response::error(MALFORMED_ACTION, &err)).await;
                return Err(ServerError::FrameTooLong { max });
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    if let Some(session) = dispatcher.session() {
        tracing::debug!(username = %session.username, "client disconnected");
    } else {
        tracing::debug!("client disconnected");
    }
    Ok(())
}
