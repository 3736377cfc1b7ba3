//! Transport capability and the thin network driver over it.
//!
//! The library does not implement TLS or TCP. It consumes a small capability
//! (create, send, receive, close, destroy, plus a one-shot receive-ready
//! callback) and layers two blocking helpers on top: [`send_all`] and
//! [`recv_some`]. The driver does not buffer, does not retry, and has no timer
//! of its own; timeouts belong to the transport.

use core::fmt::Debug;

use crate::error::Error;

/// Callback installed on a transport, invoked on its own thread whenever
/// response data is ready to be read.
pub type ReceiveCallback = Box<dyn Fn() + Send + Sync>;

/// Where to reach the server.
#[derive(Debug, Clone, Copy)]
pub struct ServerInfo<'a> {
    /// Server host name.
    pub host: &'a str,
    /// Server port.
    pub port: u16,
    /// Per-receive wait in milliseconds the transport should apply.
    pub timeout_ms: u32,
}

/// TLS material and options passed through to the transport.
///
/// Absent fields mean the transport's defaults apply; what is mandatory
/// depends on the transport implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    /// Root CA certificate bytes.
    pub root_ca: Option<&'a [u8]>,
    /// Client certificate bytes.
    pub client_cert: Option<&'a [u8]>,
    /// Client private key bytes.
    pub private_key: Option<&'a [u8]>,
    /// ALPN protocol list.
    pub alpn_protocols: Option<&'a str>,
    /// Suppress SNI during the TLS handshake.
    pub disable_sni: bool,
}

/// An established byte stream to one origin.
///
/// Implementations must tolerate `send`/`receive`/`close` racing from
/// different threads: the send task, the receive dispatcher, and a
/// disconnecting caller may all hold the transport at once, and a concurrent
/// `close` is expected to unblock a receive in progress.
pub trait Transport: Send + Sync {
    /// Transport-level error type.
    type Error: Debug + Send;

    /// Install the receive-ready callback. Called once per connection.
    fn set_receive_callback(&self, callback: ReceiveCallback) -> Result<(), Self::Error>;

    /// Send up to `buf.len()` bytes, returning how many were accepted.
    /// `Ok(0)` is treated as a transfer failure by the driver.
    fn send(&self, buf: &[u8]) -> Result<usize, Self::Error>;

    /// Receive up to `buf.len()` bytes, returning how many arrived.
    /// `Ok(0)` means the receive window elapsed without data.
    fn receive(&self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Shut the stream down. The connection above has already committed to
    /// teardown when this is called.
    fn close(&self) -> Result<(), Self::Error>;

    /// Release transport resources. Most implementations release in `Drop`
    /// and leave this empty.
    fn destroy(&self) {}
}

/// Creates [`Transport`] instances; the connection keeps it so a disconnected
/// connection can be re-established on the next submit.
pub trait TransportFactory: Send + Sync {
    /// The transport this factory produces.
    type Transport: Transport;

    /// Connect to `server`. `credentials` is `None` for a non-TLS connection.
    fn create(
        &self,
        server: &ServerInfo<'_>,
        credentials: Option<&Credentials<'_>>,
    ) -> Result<Self::Transport, <Self::Transport as Transport>::Error>;
}

/// Object-safe face of the driver used by the parser-driving code, so the
/// response paths do not need the transport type parameter.
pub(crate) trait Io {
    fn send_all(&self, buf: &[u8]) -> Result<(), Error>;
    fn recv_some(&self, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<T: Transport> Io for T {
    /// Loop over `send` until every byte is delivered.
    fn send_all(&self, buf: &[u8]) -> Result<(), Error> {
        let mut sent_total = 0;
        while sent_total < buf.len() {
            match self.send(&buf[sent_total..]) {
                Ok(0) => {
                    log::error!(
                        "transport accepted no data with {} of {} bytes left to send",
                        buf.len() - sent_total,
                        buf.len()
                    );
                    return Err(Error::NetworkError);
                }
                Ok(n) => sent_total += n,
                Err(e) => {
                    log::error!("transport send failed: {e:?}");
                    return Err(Error::NetworkError);
                }
            }
        }
        Ok(())
    }

    /// One transport receive. Partial reads are normal and expected.
    fn recv_some(&self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.receive(buf) {
            Ok(0) => Err(Error::Timeout),
            Ok(n) => Ok(n),
            Err(e) => {
                log::error!("transport receive failed: {e:?}");
                Err(Error::NetworkError)
            }
        }
    }
}

/// Close and destroy without propagating: the caller has already committed to
/// teardown, so failures are only worth a warning.
pub(crate) fn shutdown_quiet<T: Transport>(transport: &T) {
    if let Err(e) = transport.close() {
        log::warn!("failed to shut down the transport: {e:?}");
    }
    transport.destroy();
}
