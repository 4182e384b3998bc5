//! Lifecycle of a single client connection.
//!
//! ```plain
//! Buffering -> Authenticating -> Publishing -> Closed
//!                             \-> Subscribed -> Closed
//! ```
//!
//! Any state can go to `Closed`. A connection never returns to an earlier
//! state. Sessions are held by the [`Relay`] and [`RoverHandle`], so whatever
//! way the connection ends, dropping the state removes them from the registry.

use std::net::SocketAddr;

use bytes::{
    Bytes,
    BytesMut,
};
use chrono::Utc;
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    net::TcpStream,
    time::Instant,
};

use crate::{
    credentials::{
        CredentialStore,
        UserRecord,
    },
    ntrip::{
        request::{
            HEADER_TERMINATOR,
            Header,
            Request,
            find_header_end,
        },
        response,
    },
    registry::{
        ConnectionId,
        RoverHandle,
    },
    relay::Relay,
    server::{
        Context,
        Error,
    },
};

/// size of the read buffer: 4 KiB
const READ_BUFFER_SIZE: usize = 0x1000;

enum ConnectionState {
    /// Waiting for the complete request header.
    Buffering,

    /// Header received, checking credentials.
    Authenticating {
        request: Request,

        /// Bytes received after the header.
        leftover: Bytes,
    },

    /// A base station sending data.
    Publishing { relay: Relay, leftover: Bytes },

    /// A rover receiving data.
    Subscribed { rover: RoverHandle },

    Closed,
}

pub(super) async fn handle_connection<C: CredentialStore>(
    mut tcp: TcpStream,
    address: SocketAddr,
    context: &Context<C>,
) -> Result<(), Error> {
    let connection_id = context.registry.next_connection_id();
    let mut state = ConnectionState::Buffering;

    loop {
        state = match state {
            ConnectionState::Buffering => buffer_header(&mut tcp, context).await?,
            ConnectionState::Authenticating { request, leftover } => {
                authenticate(&mut tcp, connection_id, address, context, request, leftover).await?
            }
            ConnectionState::Publishing { relay, leftover } => {
                publish(&mut tcp, context, relay, leftover).await?
            }
            ConnectionState::Subscribed { rover } => subscribe(&mut tcp, context, rover).await?,
            ConnectionState::Closed => break,
        };
    }

    Ok(())
}

async fn respond_and_close(tcp: &mut TcpStream, response: &[u8]) -> Result<ConnectionState, Error> {
    tcp.write_all(response).await?;
    // the client might have hung up already.
    let _ = tcp.shutdown().await;
    Ok(ConnectionState::Closed)
}

async fn buffer_header<C>(
    tcp: &mut TcpStream,
    context: &Context<C>,
) -> Result<ConnectionState, Error> {
    let deadline = Instant::now() + context.config.handshake_timeout;
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    let header_end = loop {
        if let Some(header_end) = find_header_end(&buffer) {
            break header_end;
        }
        if buffer.len() >= context.config.max_header_size {
            tracing::debug!(size = buffer.len(), "request header too large");
            return respond_and_close(tcp, response::BAD_REQUEST).await;
        }

        buffer.reserve(READ_BUFFER_SIZE);
        tokio::select! {
            _ = context.shutdown.cancelled() => return Ok(ConnectionState::Closed),
            _ = tokio::time::sleep_until(deadline) => {
                tracing::debug!("handshake timed out");
                return Ok(ConnectionState::Closed);
            }
            result = tcp.read_buf(&mut buffer) => {
                if result? == 0 {
                    tracing::debug!("connection closed during handshake");
                    return Ok(ConnectionState::Closed);
                }
            }
        }
    };

    if header_end > context.config.max_header_size {
        tracing::debug!(size = header_end, "request header too large");
        return respond_and_close(tcp, response::BAD_REQUEST).await;
    }

    let header = Header::parse(&buffer[..header_end]);
    let leftover = buffer
        .split_off(header_end + HEADER_TERMINATOR.len())
        .freeze();

    match Request::parse(&header) {
        Ok(request) => {
            tracing::debug!(?request, leftover = leftover.len());
            Ok(ConnectionState::Authenticating { request, leftover })
        }
        Err(error) => {
            tracing::debug!(%error, request_line = ?header.request_line, "invalid request");
            respond_and_close(tcp, response::BAD_REQUEST).await
        }
    }
}

async fn authenticate<C: CredentialStore>(
    tcp: &mut TcpStream,
    connection_id: ConnectionId,
    address: SocketAddr,
    context: &Context<C>,
    request: Request,
    leftover: Bytes,
) -> Result<ConnectionState, Error> {
    match request {
        Request::Sourcetable => {
            let sourcetable =
                response::sourcetable(&context.config.identity, &context.registry.snapshot());
            respond_and_close(tcp, sourcetable.as_bytes()).await
        }
        Request::Source {
            mountpoint,
            password,
        } => {
            let Some(password) = password
            else {
                tracing::info!(%mountpoint, "base station sent no password");
                return respond_and_close(tcp, response::BAD_PASSWORD).await;
            };

            let record = match context.credentials.lookup_mountpoint(&mountpoint).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::info!(%mountpoint, "unknown mountpoint");
                    return respond_and_close(tcp, response::BAD_PASSWORD).await;
                }
                Err(error) => {
                    tracing::warn!(%mountpoint, ?error, "mountpoint lookup failed");
                    return respond_and_close(tcp, response::BAD_PASSWORD).await;
                }
            };

            if !context.credentials.verify(&password, &record.password) {
                tracing::info!(%mountpoint, "wrong mountpoint password");
                return respond_and_close(tcp, response::BAD_PASSWORD).await;
            }

            let base = context.registry.register_base(
                connection_id,
                &mountpoint,
                address,
                record.position,
            );
            tcp.write_all(response::OK).await?;
            tracing::info!(%mountpoint, "base station connected");

            Ok(ConnectionState::Publishing {
                relay: Relay::new(base, context.geoid.clone()),
                leftover,
            })
        }
        Request::Get {
            mountpoint,
            credentials,
        } => {
            let Some(credentials) = credentials
            else {
                tracing::info!(%mountpoint, "rover sent no credentials");
                return respond_and_close(tcp, response::unauthorized(&mountpoint).as_bytes()).await;
            };

            let Some(user) =
                lookup_user(context, &credentials.username, &credentials.password).await
            else {
                return respond_and_close(tcp, response::unauthorized(&mountpoint).as_bytes()).await;
            };

            if user.is_expired(Utc::now()) {
                tracing::info!(username = %user.username, "account expired");
                return respond_and_close(tcp, response::unauthorized(&mountpoint).as_bytes()).await;
            }

            if !user.may_access(&mountpoint) {
                tracing::info!(username = %user.username, %mountpoint, "mountpoint not allowed");
                return respond_and_close(tcp, response::FORBIDDEN).await;
            }

            match context.registry.register_rover(
                connection_id,
                &mountpoint,
                &user.username,
                address,
            ) {
                Ok(rover) => {
                    tcp.write_all(response::OK).await?;
                    tracing::info!(username = %user.username, %mountpoint, "rover connected");
                    Ok(ConnectionState::Subscribed { rover })
                }
                Err(error) => {
                    tracing::info!(username = %user.username, %error);
                    respond_and_close(tcp, response::MOUNTPOINT_NOT_AVAILABLE).await
                }
            }
        }
    }
}

async fn lookup_user<C: CredentialStore>(
    context: &Context<C>,
    username: &str,
    password: &str,
) -> Option<UserRecord> {
    let user = match context.credentials.lookup_user(username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::info!(%username, "unknown user");
            return None;
        }
        Err(error) => {
            tracing::warn!(%username, ?error, "user lookup failed");
            return None;
        }
    };

    if context.credentials.verify(password, &user.password) {
        Some(user)
    }
    else {
        tracing::info!(%username, "wrong user password");
        None
    }
}

async fn publish<C>(
    tcp: &mut TcpStream,
    context: &Context<C>,
    mut relay: Relay,
    leftover: Bytes,
) -> Result<ConnectionState, Error> {
    // whatever came with the header goes out before anything we read now.
    if !leftover.is_empty() {
        relay.push(leftover);
    }

    let closed = relay.base().closed().clone();
    let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        buffer.reserve(READ_BUFFER_SIZE);
        tokio::select! {
            _ = context.shutdown.cancelled() => break,
            _ = closed.cancelled() => {
                tracing::info!(mountpoint = %relay.base().mountpoint(), "base station was replaced");
                break;
            }
            result = tokio::time::timeout(context.config.source_idle_timeout, tcp.read_buf(&mut buffer)) => {
                let Ok(result) = result
                else {
                    tracing::info!(mountpoint = %relay.base().mountpoint(), "base station idle, disconnecting");
                    break;
                };
                if result? == 0 {
                    break;
                }
                relay.push(buffer.split().freeze());
            }
        }
    }

    tracing::info!(mountpoint = %relay.base().mountpoint(), "base station disconnected");
    Ok(ConnectionState::Closed)
}

async fn subscribe<C>(
    tcp: &mut TcpStream,
    context: &Context<C>,
    mut rover: RoverHandle,
) -> Result<ConnectionState, Error> {
    let (mut tcp_read, mut tcp_write) = tcp.split();

    // rovers may send NMEA sentences. we read and discard them.
    let mut discard = [0u8; 256];

    loop {
        tokio::select! {
            _ = context.shutdown.cancelled() => break,
            chunk = rover.recv() => {
                let Some(chunk) = chunk
                else {
                    tracing::info!("base station went away");
                    break;
                };
                tcp_write.write_all(&chunk).await?;
            }
            result = tcp_read.read(&mut discard) => {
                if result? == 0 {
                    break;
                }
            }
        }
    }

    tracing::info!(rover = %rover.connection_id(), "rover disconnected");
    Ok(ConnectionState::Closed)
}
