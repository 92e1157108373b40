//! Modern server list ping.
//!
//! The client sends a handshake (next state = status) and an empty status
//! request back to back, then reads one status response packet holding the
//! server's JSON.

use std::{
    io,
    ops::Range,
    time::{Duration, Instant},
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::{
    Decoded,
    varint::{self, VarIntError},
};
use crate::{PingError, net, options::Options};

pub const HANDSHAKE_PACKET_ID: u32 = 0x00;
pub const STATUS_PACKET_ID: u32 = 0x00;
pub const NEXT_STATE_STATUS: u32 = 1;

/// Largest length a 3-byte varint can hold, which is the protocol's packet size
/// limit.
pub const MAX_PACKET_LENGTH: usize = 2_097_151;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlpState {
    Connecting,
    HandshakeSent,
    AwaitingResponse,
    Complete,
    Failed,
}

/// Prefixes a packet (id + fields) with its length.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + varint::MAX_LEN);
    varint::write(&mut packet, payload.len() as u32);
    packet.extend_from_slice(payload);
    packet
}

pub fn handshake_packet(protocol_version: i32, address: &str, port: u16) -> Vec<u8> {
    let mut payload = Vec::new();
    varint::write(&mut payload, HANDSHAKE_PACKET_ID);
    varint::write_i32(&mut payload, protocol_version);
    varint::write_string(&mut payload, address);
    payload.extend_from_slice(&port.to_be_bytes());
    varint::write(&mut payload, NEXT_STATE_STATUS);
    frame(&payload)
}

pub fn status_request_packet() -> Vec<u8> {
    let mut payload = Vec::new();
    varint::write(&mut payload, STATUS_PACKET_ID);
    frame(&payload)
}

/// The handshake immediately followed by the status request. The server
/// switches to the status state after the handshake, so the order matters.
pub fn build_request(protocol_version: i32, address: &str, port: u16) -> Vec<u8> {
    let mut request = handshake_packet(protocol_version, address, port);
    request.extend(status_request_packet());
    request
}

/// Reassembles a status response from however the bytes happen to arrive.
///
/// Nothing is consumed until the whole JSON string is buffered, so pushing a
/// chunk either completes the frame, asks for more, or rejects it for good.
#[derive(Debug, Default)]
pub struct StatusFrame {
    buf: Vec<u8>,
}

impl StatusFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Adds a chunk and returns the JSON text once all of it has arrived.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Decoded<String>, PingError> {
        self.buf.extend_from_slice(chunk);
        let Decoded::Complete(json) = self.json_range()? else {
            return Ok(Decoded::Incomplete);
        };
        let json = String::from_utf8(self.buf[json].to_vec())
            .map_err(|e| PingError::malformed(format!("status json is not utf-8: {e}")))?;
        Ok(Decoded::Complete(json))
    }

    /// Same framing as [`Self::push`] without looking at the JSON, for when only
    /// the arrival time matters.
    pub fn push_frame_only(&mut self, chunk: &[u8]) -> Result<Decoded<()>, PingError> {
        self.buf.extend_from_slice(chunk);
        Ok(match self.json_range()? {
            Decoded::Complete(_) => Decoded::Complete(()),
            Decoded::Incomplete => Decoded::Incomplete,
        })
    }

    /// Where the JSON string sits in the buffer, if it's all there.
    fn json_range(&self) -> Result<Decoded<Range<usize>>, PingError> {
        let Decoded::Complete((packet_length, mut offset)) = varint_at(&self.buf, 0)? else {
            return Ok(Decoded::Incomplete);
        };
        let packet_length = packet_length as usize;
        if packet_length == 0 {
            return Err(PingError::malformed("empty packet"));
        }
        if packet_length > MAX_PACKET_LENGTH {
            return Err(PingError::malformed(format!(
                "packet length {packet_length} is over the {MAX_PACKET_LENGTH} byte limit"
            )));
        }
        let packet_end = offset + packet_length;

        let Decoded::Complete((packet_id, id_size)) = varint_at(&self.buf, offset)? else {
            return Ok(Decoded::Incomplete);
        };
        offset += id_size;
        if packet_id != STATUS_PACKET_ID {
            return Err(PingError::malformed(format!(
                "expected status response (0x00), got packet 0x{packet_id:02x}"
            )));
        }

        let Decoded::Complete((json_length, length_size)) = varint_at(&self.buf, offset)? else {
            // the length can't start past the end of the packet
            if offset >= packet_end {
                return Err(PingError::malformed("status response has no json field"));
            }
            return Ok(Decoded::Incomplete);
        };
        offset += length_size;

        let json_end = offset.saturating_add(json_length as usize);
        if json_end > packet_end {
            return Err(PingError::malformed(format!(
                "json length {json_length} runs past the end of a {packet_length} byte packet"
            )));
        }
        if self.buf.len() < json_end {
            return Ok(Decoded::Incomplete);
        }
        Ok(Decoded::Complete(offset..json_end))
    }
}

fn varint_at(buf: &[u8], offset: usize) -> Result<Decoded<(u32, usize)>, PingError> {
    match varint::decode(buf, offset) {
        Ok(v) => Ok(Decoded::Complete(v)),
        Err(VarIntError::Truncated) => Ok(Decoded::Incomplete),
        Err(e @ VarIntError::TooLong) => Err(PingError::malformed(e.to_string())),
    }
}

/// Connects, sends the request, and feeds what comes back into `decode` until
/// it's satisfied.
async fn exchange<T>(
    host: &str,
    port: u16,
    options: &Options,
    mut decode: impl FnMut(&mut StatusFrame, &[u8]) -> Result<Decoded<T>, PingError>,
) -> Result<T, PingError> {
    trace!(state = ?SlpState::Connecting, "{host}:{port}");
    let mut stream = net::connect_tcp(host, port).await?;

    let request = build_request(
        options.protocol_version,
        options.handshake_hostname(host),
        port,
    );
    stream.write_all(&request).await?;
    stream.flush().await?;
    trace!(state = ?SlpState::HandshakeSent, "{host}:{port}: wrote {} bytes", request.len());

    trace!(state = ?SlpState::AwaitingResponse, "{host}:{port}");
    let mut frame = StatusFrame::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "connection closed after {} bytes of an incomplete status response",
                    frame.buffered()
                ),
            )
            .into());
        }
        if let Decoded::Complete(out) = decode(&mut frame, &chunk[..n])? {
            debug!(state = ?SlpState::Complete, "{host}:{port}: {} byte response", frame.buffered());
            // dropping the stream here closes it
            return Ok(out);
        }
    }
}

/// Asks the server for its status and returns the raw JSON document.
pub async fn status_query(host: &str, port: u16, options: &Options) -> Result<String, PingError> {
    net::with_deadline(
        options.timeout,
        exchange(host, port, options, |frame, chunk| frame.push(chunk)),
    )
    .await
    .inspect_err(|err| debug!(state = ?SlpState::Failed, "{host}:{port}: {err}"))
}

/// Time from starting to connect until a complete status response has been
/// received.
pub async fn latency_ping(host: &str, port: u16, options: &Options) -> Result<Duration, PingError> {
    let started = Instant::now();
    net::with_deadline(
        options.timeout,
        exchange(host, port, options, |frame, chunk| frame.push_frame_only(chunk)),
    )
    .await
    .inspect_err(|err| debug!(state = ?SlpState::Failed, "{host}:{port}: {err}"))?;
    Ok(started.elapsed())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    const STATUS_JSON: &str = r#"{"version":{"name":"1.21.1","protocol":767},"players":{"max":20,"online":1,"sample":[{"name":"Notch","id":"069a79f4-44e9-4726-a5be-fca90e38aaf5"}]},"description":{"text":"A Minecraft Server"}}"#;

    fn status_response(json: &str) -> Vec<u8> {
        let mut payload = Vec::new();
        varint::write(&mut payload, STATUS_PACKET_ID);
        varint::write_string(&mut payload, json);
        frame(&payload)
    }

    fn options(timeout_ms: u64) -> Options {
        Options::default().with_timeout(Duration::from_millis(timeout_ms))
    }

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    /// Reads exactly what a well-behaved client sends before it starts reading.
    async fn read_request(conn: &mut TcpStream, port: u16) -> Vec<u8> {
        let expected = build_request(-1, "127.0.0.1", port);
        let mut request = vec![0u8; expected.len()];
        conn.read_exact(&mut request).await.unwrap();
        request
    }

    async fn wait_for_close(conn: &mut TcpStream) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    #[test]
    fn test_handshake_bytes() {
        let mut expected = vec![19, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F, 9];
        expected.extend_from_slice(b"localhost");
        expected.extend_from_slice(&[0x63, 0xDD, 0x01]);
        assert_eq!(handshake_packet(-1, "localhost", 25565), expected);
    }

    #[test]
    fn test_status_request_bytes() {
        assert_eq!(status_request_packet(), vec![0x01, 0x00]);
    }

    #[test]
    fn test_request_is_handshake_then_status_request() {
        let request = build_request(0, "mc.example.com", 25565);
        let handshake = handshake_packet(0, "mc.example.com", 25565);
        assert_eq!(&request[..handshake.len()], &handshake[..]);
        assert_eq!(&request[handshake.len()..], &[0x01, 0x00]);
        // the outer length covers the payload, not itself
        assert_eq!(handshake[0] as usize, handshake.len() - 1);
    }

    #[test]
    fn test_frame_all_at_once() {
        let mut frame = StatusFrame::new();
        assert_eq!(
            frame.push(&status_response(STATUS_JSON)).unwrap(),
            Decoded::Complete(STATUS_JSON.to_string())
        );
    }

    #[test]
    fn test_frame_one_byte_at_a_time() {
        let bytes = status_response(STATUS_JSON);
        let mut frame = StatusFrame::new();
        for (i, byte) in bytes.iter().enumerate() {
            let result = frame.push(std::slice::from_ref(byte)).unwrap();
            if i + 1 < bytes.len() {
                assert_eq!(result, Decoded::Incomplete, "completed early at byte {i}");
            } else {
                assert_eq!(result, Decoded::Complete(STATUS_JSON.to_string()));
            }
        }
    }

    #[test]
    fn test_frame_uneven_chunks() {
        let bytes = status_response(STATUS_JSON);
        for split in [1, 2, 3, 4, 50, bytes.len() - 1] {
            let mut frame = StatusFrame::new();
            assert_eq!(frame.push(&bytes[..split]).unwrap(), Decoded::Incomplete);
            assert_eq!(
                frame.push(&bytes[split..]).unwrap(),
                Decoded::Complete(STATUS_JSON.to_string())
            );
        }
    }

    #[test]
    fn test_frame_only() {
        let bytes = status_response(STATUS_JSON);
        let mut frame = StatusFrame::new();
        assert_eq!(frame.push_frame_only(&bytes[..10]).unwrap(), Decoded::Incomplete);
        assert_eq!(frame.push_frame_only(&bytes[10..]).unwrap(), Decoded::Complete(()));
    }

    #[test]
    fn test_frame_rejects_wrong_packet_id() {
        let mut frame = StatusFrame::new();
        let result = frame.push(&[0x05, 0x01, 0x03, b'{', b'}', b' ']);
        assert!(matches!(result, Err(PingError::MalformedResponse(_))));
    }

    #[test]
    fn test_frame_rejects_oversized_length() {
        let mut frame = StatusFrame::new();
        // 2097152, one past the limit, and nothing else yet
        let result = frame.push(&[0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(result, Err(PingError::MalformedResponse(_))));
    }

    #[test]
    fn test_frame_rejects_overlong_varint() {
        let mut frame = StatusFrame::new();
        let result = frame.push(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(result, Err(PingError::MalformedResponse(_))));
    }

    #[test]
    fn test_frame_rejects_json_longer_than_packet() {
        let mut frame = StatusFrame::new();
        // packet of 3 bytes claiming a 100 byte string
        let result = frame.push(&[0x03, 0x00, 0x64, b'{']);
        assert!(matches!(result, Err(PingError::MalformedResponse(_))));
    }

    #[test]
    fn test_frame_rejects_invalid_utf8() {
        let mut frame = StatusFrame::new();
        let result = frame.push(&[0x04, 0x00, 0x02, 0xC3, 0x28]);
        assert!(matches!(result, Err(PingError::MalformedResponse(_))));
    }

    #[test]
    fn test_frame_waits_on_partial_varints() {
        let mut frame = StatusFrame::new();
        assert_eq!(frame.push(&[]).unwrap(), Decoded::Incomplete);
        // first byte of a two byte length
        assert_eq!(frame.push(&[0x80]).unwrap(), Decoded::Incomplete);
        assert_eq!(frame.buffered(), 1);
    }

    #[tokio::test]
    async fn test_status_query() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let request = read_request(&mut conn, addr.port()).await;
            // dribble the response out a byte at a time
            for byte in status_response(STATUS_JSON) {
                conn.write_all(&[byte]).await.unwrap();
                conn.flush().await.unwrap();
            }
            let closed = wait_for_close(&mut conn).await;
            (request, closed)
        });

        let json = status_query("127.0.0.1", addr.port(), &options(5000))
            .await
            .unwrap();
        assert_eq!(json, STATUS_JSON);

        let (request, closed) = server.await.unwrap();
        assert_eq!(request, build_request(-1, "127.0.0.1", addr.port()));
        assert!(closed);
    }

    #[tokio::test]
    async fn test_handshake_hostname_override() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let expected = build_request(767, "play.example.com", addr.port());
            let mut request = vec![0u8; expected.len()];
            conn.read_exact(&mut request).await.unwrap();
            conn.write_all(&status_response("{}")).await.unwrap();
            (request, expected)
        });

        let options = Options {
            protocol_version: 767,
            hostname: Some("play.example.com".to_string()),
            ..Options::default()
        };
        let json = status_query("127.0.0.1", addr.port(), &options).await.unwrap();
        assert_eq!(json, "{}");

        let (request, expected) = server.await.unwrap();
        assert_eq!(request, expected);
    }

    #[tokio::test]
    async fn test_latency_ping() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            read_request(&mut conn, addr.port()).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            conn.write_all(&status_response(STATUS_JSON)).await.unwrap();
            wait_for_close(&mut conn).await;
        });

        let latency = latency_ping("127.0.0.1", addr.port(), &options(5000))
            .await
            .unwrap();
        assert!(latency >= Duration::from_millis(50), "{latency:?}");
        assert!(latency < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            read_request(&mut conn, addr.port()).await;
            // a login disconnect packet, not a status response
            conn.write_all(&[0x03, 0x1A, 0x01, b'x']).await.unwrap();
            wait_for_close(&mut conn).await;
        });

        let result = status_query("127.0.0.1", addr.port(), &options(5000)).await;
        assert!(matches!(result, Err(PingError::MalformedResponse(_))), "{result:?}");
    }

    #[tokio::test]
    async fn test_closed_before_complete() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            read_request(&mut conn, addr.port()).await;
            let response = status_response(STATUS_JSON);
            conn.write_all(&response[..20]).await.unwrap();
        });

        let result = status_query("127.0.0.1", addr.port(), &options(5000)).await;
        match result {
            Err(PingError::Connection(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_closes_socket() {
        let (listener, addr) = listener().await;
        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            read_request(&mut conn, addr.port()).await;
            // never answer, just wait to see the client hang up
            wait_for_close(&mut conn).await
        });

        let started = Instant::now();
        let result = status_query("127.0.0.1", addr.port(), &options(200)).await;
        assert!(matches!(result, Err(PingError::Timeout(_))), "{result:?}");
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(server.await.unwrap(), "client socket was left open");
    }

    #[tokio::test]
    async fn test_latency_ping_timeout() {
        let (listener, addr) = listener().await;
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            wait_for_close(&mut conn).await;
        });

        let result = latency_ping("127.0.0.1", addr.port(), &options(150)).await;
        assert!(result.as_ref().is_err_and(PingError::is_timeout), "{result:?}");
    }

    #[tokio::test]
    async fn test_repeated_timeouts_release_sockets() {
        let (listener, addr) = listener().await;
        for _ in 0..3 {
            let client = tokio::spawn(async move {
                status_query("127.0.0.1", addr.port(), &options(100)).await
            });
            let (mut conn, _) = listener.accept().await.unwrap();
            let result = client.await.unwrap();
            assert!(matches!(result, Err(PingError::Timeout(_))));
            // the previous connection is gone before the next one is opened
            assert!(wait_for_close(&mut conn).await);
        }
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let (listener, addr) = listener().await;
        drop(listener);

        for _ in 0..3 {
            let result = status_query("127.0.0.1", addr.port(), &options(1000)).await;
            assert!(matches!(result, Err(PingError::Connection(_))), "{result:?}");
        }
    }

    #[tokio::test]
    async fn test_latency_ping_refused() {
        let (listener, addr) = listener().await;
        drop(listener);

        for _ in 0..3 {
            let result = latency_ping("127.0.0.1", addr.port(), &options(1000)).await;
            assert!(result.as_ref().is_err_and(PingError::is_connection), "{result:?}");
        }
    }
}
