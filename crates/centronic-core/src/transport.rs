//! Gateway transport
//!
//! Connects to the Centronic USB stick either directly over a serial device
//! or through a TCP-bridged gateway (ser2net and friends). The device string
//! decides which: anything that looks like a filesystem path or a COM port
//! is serial, everything else is treated as `host[:port]`.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, warn};

use crate::protocol::{CentronicError, DEFAULT_DEVICE, DEFAULT_SOCKET_PORT};

/// Baud rate of the Centronic stick
pub const BAUD_RATE: u32 = 115200;

const READ_CHUNK: usize = 1024;

/// Classified device descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// Local serial device
    Serial { path: String },
    /// TCP-bridged gateway
    Socket { host: String, port: u16 },
}

impl DeviceKind {
    /// Classify and validate a device string.
    ///
    /// An empty string selects the stick's default udev path. Serial paths
    /// must exist (or, for COM ports, be enumerable) at construction time so
    /// a typo fails fast instead of surfacing later in the worker thread.
    pub fn classify(device: &str) -> Result<Self, CentronicError> {
        let device = if device.is_empty() { DEFAULT_DEVICE } else { device };

        if device.contains('/') {
            if !Path::new(device).exists() {
                return Err(CentronicError::Configuration(format!(
                    "serial device {device} does not exist"
                )));
            }
            return Ok(DeviceKind::Serial {
                path: device.to_string(),
            });
        }

        if is_com_port(device) {
            let known = serialport::available_ports()
                .map(|ports| ports.iter().any(|p| p.port_name.eq_ignore_ascii_case(device)))
                .unwrap_or(false);
            if !known {
                return Err(CentronicError::Configuration(format!(
                    "serial port {device} not found"
                )));
            }
            return Ok(DeviceKind::Serial {
                path: device.to_string(),
            });
        }

        let (host, port) = match device.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    CentronicError::Configuration(format!("invalid port in {device:?}"))
                })?;
                (host, port)
            }
            None => (device, DEFAULT_SOCKET_PORT),
        };
        if host.is_empty() {
            return Err(CentronicError::Configuration(format!(
                "invalid device descriptor {device:?}"
            )));
        }
        Ok(DeviceKind::Socket {
            host: host.to_string(),
            port,
        })
    }
}

fn is_com_port(device: &str) -> bool {
    let upper = device.to_ascii_uppercase();
    match upper.strip_prefix("COM") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// A raw byte link to the gateway
///
/// Implemented by the serial and socket links; tests substitute an in-memory
/// channel through [`Transport::with_channel`].
pub trait Channel: Send {
    fn is_open(&self) -> bool;
    fn open(&mut self) -> io::Result<()>;
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    /// Append whatever is available without blocking, returning the byte count
    fn read_available(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize>;
    fn close(&mut self);
}

/// Serial link to a locally attached stick
pub struct SerialLink {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn new(path: String) -> Self {
        Self { path, port: None }
    }
}

impl Channel for SerialLink {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn open(&mut self) -> io::Result<()> {
        let port = serialport::new(&self.path, BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(io::Error::other)?;
        debug!(path = %self.path, "serial device opened");
        self.port = Some(port);
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        port.write_all(data)?;
        port.flush()
    }

    fn read_available(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        let available = port.bytes_to_read().map_err(io::Error::other)? as usize;
        if available == 0 {
            return Ok(0);
        }
        let mut chunk = vec![0u8; available.min(READ_CHUNK)];
        let n = port.read(&mut chunk)?;
        buffer.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn close(&mut self) {
        self.port = None;
    }
}

/// TCP link to a network-bridged stick
pub struct SocketLink {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl SocketLink {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            stream: None,
        }
    }
}

impl Channel for SocketLink {
    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self) -> io::Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_nonblocking(true)?;
        debug!(host = %self.host, port = self.port, "gateway socket connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_open)?;
        stream.write_all(data)
    }

    fn read_available(&mut self, buffer: &mut Vec<u8>) -> io::Result<usize> {
        let stream = self.stream.as_mut().ok_or_else(not_open)?;
        let mut chunk = [0u8; READ_CHUNK];
        match stream.read(&mut chunk) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "gateway closed the connection",
            )),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "link not open")
}

/// Reconnecting transport over a serial or socket channel
///
/// Socket links are expected to drop (sleeping bridges, flaky WiFi), so a
/// failed socket write reconnects and retries once, and a failed socket read
/// just closes the link for the next attempt. Serial failures are fatal: a
/// vanished USB device will not come back by retrying.
pub struct Transport {
    kind: DeviceKind,
    channel: Box<dyn Channel>,
}

impl Transport {
    /// Classify the device string and open the link.
    ///
    /// A serial device that cannot be opened fails construction. A gateway
    /// socket that is down only logs; the lazy reopen in `write`/`read`
    /// keeps retrying once traffic flows.
    pub fn new(device: &str) -> Result<Self, CentronicError> {
        let kind = DeviceKind::classify(device)?;
        let channel: Box<dyn Channel> = match &kind {
            DeviceKind::Serial { path } => Box::new(SerialLink::new(path.clone())),
            DeviceKind::Socket { host, port } => Box::new(SocketLink::new(host.clone(), *port)),
        };
        let mut transport = Self { kind, channel };
        if let Err(e) = transport.channel.open() {
            match transport.kind {
                DeviceKind::Serial { .. } => {
                    return Err(CentronicError::Connection(format!(
                        "cannot open {device}: {e}"
                    )));
                }
                DeviceKind::Socket { .. } => {
                    warn!(error = %e, "gateway not reachable yet, will retry on demand");
                }
            }
        }
        Ok(transport)
    }

    /// Wrap an already constructed channel. The channel is opened if needed.
    pub fn with_channel(kind: DeviceKind, mut channel: Box<dyn Channel>) -> io::Result<Self> {
        if !channel.is_open() {
            channel.open()?;
        }
        Ok(Self { kind, channel })
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    /// Write a packet to the gateway, reopening the link if it was closed.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CentronicError> {
        if !self.channel.is_open() {
            self.channel
                .open()
                .map_err(|e| CentronicError::Connection(format!("reopen failed: {e}")))?;
        }
        match self.channel.write_all(data) {
            Ok(()) => Ok(()),
            Err(e) => match self.kind {
                DeviceKind::Serial { .. } => {
                    Err(CentronicError::Connection(format!("serial write failed: {e}")))
                }
                DeviceKind::Socket { .. } => {
                    warn!(error = %e, "socket write failed, reconnecting");
                    self.channel.close();
                    self.channel
                        .open()
                        .map_err(|e| CentronicError::Connection(format!("reconnect failed: {e}")))?;
                    self.channel
                        .write_all(data)
                        .map_err(|e| CentronicError::Connection(format!("socket write failed: {e}")))
                }
            },
        }
    }

    /// Read whatever the gateway has buffered into `buffer`.
    ///
    /// A socket read error closes the link and reports no data; the next
    /// write reopens it. Serial read errors propagate.
    pub fn read(&mut self, buffer: &mut Vec<u8>) -> Result<usize, CentronicError> {
        if !self.channel.is_open() && self.channel.open().is_err() {
            return Ok(0);
        }
        match self.channel.read_available(buffer) {
            Ok(n) => Ok(n),
            Err(e) => match self.kind {
                DeviceKind::Serial { .. } => {
                    Err(CentronicError::Connection(format!("serial read failed: {e}")))
                }
                DeviceKind::Socket { .. } => {
                    warn!(error = %e, "socket read failed, closing link");
                    self.channel.close();
                    Ok(0)
                }
            },
        }
    }

    pub fn close(&mut self) {
        self.channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_empty_uses_default_device() {
        // The default udev path does not exist on build machines.
        let err = DeviceKind::classify("").unwrap_err();
        assert!(matches!(err, CentronicError::Configuration(_)));
    }

    #[test]
    fn test_classify_missing_serial_path() {
        let err = DeviceKind::classify("/dev/does-not-exist-centronic").unwrap_err();
        assert!(matches!(err, CentronicError::Configuration(_)));
    }

    #[test]
    fn test_classify_existing_path_is_serial() {
        assert_eq!(
            DeviceKind::classify("/dev/null").unwrap(),
            DeviceKind::Serial {
                path: "/dev/null".to_string()
            }
        );
    }

    #[test]
    fn test_classify_host_with_port() {
        assert_eq!(
            DeviceKind::classify("bridge.local:2323").unwrap(),
            DeviceKind::Socket {
                host: "bridge.local".to_string(),
                port: 2323
            }
        );
    }

    #[test]
    fn test_classify_host_defaults_port() {
        assert_eq!(
            DeviceKind::classify("192.168.1.50").unwrap(),
            DeviceKind::Socket {
                host: "192.168.1.50".to_string(),
                port: DEFAULT_SOCKET_PORT
            }
        );
    }

    #[test]
    fn test_classify_rejects_bad_port() {
        assert!(DeviceKind::classify("bridge.local:notaport").is_err());
        assert!(DeviceKind::classify(":5000").is_err());
    }

    #[test]
    fn test_socket_transport_constructs_while_gateway_down() {
        // Grab a port the OS just freed so nothing is listening on it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        // Construction succeeds with the gateway down; the failure surfaces
        // on the first write instead.
        let mut transport = Transport::new(&format!("127.0.0.1:{port}")).unwrap();
        assert_eq!(
            transport.kind(),
            &DeviceKind::Socket {
                host: "127.0.0.1".to_string(),
                port
            }
        );
        assert!(matches!(
            transport.write(b"x"),
            Err(CentronicError::Connection(_))
        ));
    }

    #[test]
    fn test_com_port_detection() {
        assert!(is_com_port("COM3"));
        assert!(is_com_port("com12"));
        assert!(!is_com_port("COM"));
        assert!(!is_com_port("COMPUTER"));
        assert!(!is_com_port("bridge.local"));
    }
}
