use std::fmt::{self, Display};

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChunksError(err) => write!(f, "{err}"),
            Error::InvalidPayload => write!(f, "response line is not UTF-8"),
        }
    }
}

/// A type for reading newline-delimited JSON texts from a chunk stream.
///
/// Lines are only split, not parsed. Blank lines are skipped, and an
/// unterminated last line is still returned when the stream ends.
pub struct NdJson {
    buf: Vec<u8>,
    chunks: Chunks,
    eof: bool,
}

impl NdJson {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
            eof: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(line) = self.try_take_line()? {
                return Ok(Some(line));
            }
            if self.eof {
                return self.take_rest();
            }

            // Bytes are buffered instead of decoded per chunk, since a
            // multi-byte character can be split between two chunks.
            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => self.eof = true,
            }
        }
    }

    fn try_take_line(&mut self) -> Result<Option<String>, Error> {
        while let Some(eol_idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=eol_idx).collect();
            let text = decode_line(&line[..eol_idx])?;
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    fn take_rest(&mut self) -> Result<Option<String>, Error> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.buf);
        let text = decode_line(&rest)?;
        Ok((!text.is_empty()).then_some(text))
    }
}

#[inline]
fn decode_line(bytes: &[u8]) -> Result<String, Error> {
    let text = str::from_utf8(bytes).map_err(|_| Error::InvalidPayload)?;
    Ok(text.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn test_normal_lines() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"{\"a\":1}\n"),
                Bytes::from_static(b"{\"b\":2}\n"),
            ]
            .into(),
        );
        let mut lines = NdJson::new(chunks);
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"a\":1}");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"b\":2}");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_chunks() {
        // "é" is split between two chunks.
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"{\"c\":\"caf\xc3"),
                Bytes::from_static(b"\xa9\"}\n\n{\"d\""),
                Bytes::from_static(b":4}"),
            ]
            .into(),
        );
        let mut lines = NdJson::new(chunks);
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "{\"c\":\"café\"}"
        );
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"d\":4}");
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"\xff\xfe\n")].into(),
        );
        let mut lines = NdJson::new(chunks);
        assert_eq!(lines.next_line().await.unwrap_err(), Error::InvalidPayload);

        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(b"\n  \n")].into(),
        );
        let mut lines = NdJson::new(chunks);
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
