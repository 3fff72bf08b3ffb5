//! Receiving side of the transfer protocol.
//!
//! The client reads the 8-byte size header and then exactly that many
//! bytes; block boundaries on the wire carry no meaning, the data is simply
//! concatenated.

use crate::runtime::protocol::{decode_header, HEADER_LEN};
use std::io::{self, Read, Write};

/// Read the size header announced by the server.
pub fn read_header<R: Read + ?Sized>(stream: &mut R) -> io::Result<u64> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    Ok(decode_header(&header))
}

/// Receive one complete file from `stream` into `out`.
///
/// Returns the file length. Fails with `UnexpectedEof` if the server closes
/// the connection before the announced number of bytes has arrived.
pub fn fetch<R, W>(stream: &mut R, out: &mut W) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let size = read_header(stream)?;
    let copied = io::copy(&mut stream.take(size), out)?;
    if copied != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("received {} of {} bytes", copied, size),
        ));
    }
    Ok(size)
}
