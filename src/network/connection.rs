use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::network::Frame;
use crate::AppResult;

/// A framed TCP connection.
///
/// Wraps the stream in a `BufWriter` for efficient writing and keeps a
/// read buffer that frames are parsed out of. Used on both sides: the
/// client reads response frames, the server reads request frames.
#[derive(Debug)]
pub struct Connection {
    writer: BufWriter<TcpStream>,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Connection {
    pub fn new(socket: TcpStream, max_frame_size: usize) -> Connection {
        Connection {
            writer: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
            max_frame_size,
        }
    }

    /// Reads one complete frame from the connection.
    ///
    /// Returns `None` if the peer closed the connection between frames.
    /// A close in the middle of a frame, a malformed length prefix or an
    /// oversized frame all return an error and the connection should be
    /// dropped.
    pub async fn read_frame(&mut self) -> AppResult<Option<BytesMut>> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.writer.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    // peer has closed the connection gracefully
                    Ok(None)
                } else {
                    // peer closed the connection while sending a frame
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> AppResult<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
