use std::io::{BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::events::StaleRepoEvent;
use crate::protocol::{
    ListResult, Request, Response, RpcError, RpcRequest, StatusResult, VersionResult, WarmResult,
    read_message, read_response, socket_path, write_message,
};

/// Client for communicating with the daemon
pub struct Client {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
    next_id: u64,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("RPC error: {} (code {})", .0.message, .0.code)]
    Rpc(RpcError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn is_not_running_io_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    ) || matches!(
        err.raw_os_error(),
        Some(libc::ECONNREFUSED)
            | Some(libc::ENOENT)
            | Some(libc::ECONNABORTED)
            | Some(libc::ECONNRESET)
            | Some(libc::EPIPE)
            | Some(libc::ENOTCONN)
    )
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        if is_not_running_io_error(&e) {
            ClientError::NotRunning
        } else {
            ClientError::Io(e)
        }
    }
}

fn unexpected(response: Response) -> ClientError {
    ClientError::InvalidResponse(format!("{:?}", response))
}

impl Client {
    /// Connect to the daemon at the default socket path
    pub fn connect() -> Result<Self, ClientError> {
        Self::connect_to(&socket_path())
    }

    pub fn connect_to(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path)?;

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Give up on reads that take longer than `timeout`.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a request and wait for response
    pub fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let rpc_request = RpcRequest::new(request, id);
        write_message(&mut self.writer, &rpc_request)?;
        self.writer.flush()?;

        match read_response(&mut self.reader)? {
            Ok(response) => Ok(response.result),
            Err(error) => Err(ClientError::Rpc(error.error)),
        }
    }

    fn call_unit(&mut self, request: Request) -> Result<(), ClientError> {
        match self.call(request)? {
            Response::Ok(()) => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn status(&mut self) -> Result<StatusResult, ClientError> {
        match self.call(Request::Status)? {
            Response::Status(s) => Ok(s),
            other => Err(unexpected(other)),
        }
    }

    pub fn list(&mut self) -> Result<ListResult, ClientError> {
        match self.call(Request::List)? {
            Response::List(l) => Ok(l),
            other => Err(unexpected(other)),
        }
    }

    /// Make sure `repo` is mirrored, cloning it if necessary.
    pub fn warm(&mut self, repo: &str) -> Result<WarmResult, ClientError> {
        match self.call(Request::Warm {
            repo: repo.to_string(),
        })? {
            Response::Warm(w) => Ok(w),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the daemon to refresh `repo` now. Returns once the sync loop has
    /// accepted the request, not when the refresh is done.
    pub fn invalidate(&mut self, repo: &str) -> Result<(), ClientError> {
        self.call_unit(Request::Invalidate {
            repo: repo.to_string(),
        })
    }

    pub fn version(&mut self) -> Result<VersionResult, ClientError> {
        match self.call(Request::Version)? {
            Response::Version(v) => Ok(v),
            other => Err(unexpected(other)),
        }
    }

    pub fn stop(&mut self) -> Result<(), ClientError> {
        self.call_unit(Request::Stop)
    }

    /// Turn this connection into a stream of staleness events.
    pub fn subscribe(mut self) -> Result<Events, ClientError> {
        self.call_unit(Request::Subscribe)?;
        Ok(Events {
            reader: self.reader,
        })
    }
}

/// Staleness events pushed by the daemon after `subscribe`.
pub struct Events {
    reader: BufReader<UnixStream>,
}

impl Iterator for Events {
    type Item = Result<StaleRepoEvent, ClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        read_message(&mut self.reader)
            .map_err(ClientError::from)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_broken_pipe_to_not_running() {
        let err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(ClientError::from(err), ClientError::NotRunning));
    }

    #[test]
    fn keeps_unrelated_io_errors_as_io() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(ClientError::from(err), ClientError::Io(_)));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let result = Client::connect_to(&dir.path().join("absent.sock"));
        assert!(matches!(result, Err(ClientError::NotRunning)));
    }

    #[test]
    fn rpc_error_display_carries_code() {
        let err = ClientError::Rpc(RpcError::invalid_params("invalid repo"));
        assert_eq!(err.to_string(), "RPC error: invalid repo (code -32602)");
    }
}
