//! The TCP protocol server.
//!
//! Connection-per-worker: every accepted connection gets its own thread and
//! performs exactly one request/response exchange (or a one-way result
//! submission). Messages are newline-delimited JSON objects. All GA state
//! lives in the shared [Trainer] behind one mutex; this layer only frames
//! messages, parses the `type` dispatch, and writes the reply.

use crate::messages::Request;
use crate::trainer::Trainer;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Where workers connect by default.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9999";

/// A connected-but-silent client is cut off after this long so it cannot pin
/// its handler thread forever.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the accept loop checks for shutdown while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket. Binding errors are returned to the caller,
    /// which decides whether to retry or exit.
    pub fn bind(address: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address).map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until the trainer reports it is done.
    pub fn serve(&self, trainer: Arc<Mutex<Trainer>>) -> Result<(), ServerError> {
        log::info!("listening on {}", self.listener.local_addr()?);
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let trainer = Arc::clone(&trainer);
                    std::thread::spawn(move || {
                        if let Err(error) = handle_connection(stream, &trainer) {
                            log::debug!("connection from {peer} aborted: {error}");
                        }
                    });
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    if trainer.lock().unwrap().is_stopped() {
                        return Ok(());
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

/// One request/response exchange. A framing error, protocol error, or read
/// timeout aborts the connection without a response and without touching any
/// trainer state.
fn handle_connection(stream: TcpStream, trainer: &Mutex<Trainer>) -> Result<(), std::io::Error> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;
    let line = line.trim();
    if line.is_empty() {
        // Closed without sending a request.
        return Ok(());
    }

    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(error) => {
            log::warn!("closing connection: unintelligible request: {error}");
            return Ok(());
        }
    };

    let reply = trainer.lock().unwrap().handle(&request);

    if let Some(response) = &reply.response {
        let mut stream = &stream;
        stream.write_all(response.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
    }

    // Persist after the trainer lock is released so a slow disk does not
    // block other workers.
    if let Some(snapshot) = &reply.save {
        if let Err(error) = snapshot.write() {
            log::error!("failed to save population state: {error}");
        }
    }
    Ok(())
}
