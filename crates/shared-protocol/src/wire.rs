//! SSH binary data representation (RFC 4251 §5)
//!
//! Reading borrows from the packet payload; writing appends to any
//! [`BufMut`], which in practice is a `BytesMut` owned by the caller.

use bytes::BufMut;

use crate::{ProtocolError, ProtocolResult};

/// Cursor over an SSH-encoded payload
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Take exactly `len` raw bytes
    pub fn read_bytes(&mut self, len: usize, field: &'static str) -> ProtocolResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ProtocolError::Truncated { field })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self, field: &'static str) -> ProtocolResult<u8> {
        Ok(self.read_bytes(1, field)?[0])
    }

    pub fn read_bool(&mut self, field: &'static str) -> ProtocolResult<bool> {
        Ok(self.read_u8(field)? != 0)
    }

    pub fn read_u32(&mut self, field: &'static str) -> ProtocolResult<u32> {
        let bytes = self.read_bytes(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// `string`: uint32 length followed by that many bytes
    pub fn read_string(&mut self, field: &'static str) -> ProtocolResult<&'a [u8]> {
        let len = self.read_u32(field)? as usize;
        self.read_bytes(len, field)
    }

    /// `string` that must hold UTF-8 text
    pub fn read_utf8(&mut self, field: &'static str) -> ProtocolResult<&'a str> {
        let bytes = self.read_string(field)?;
        std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8(field))
    }

    /// `name-list`: comma separated US-ASCII names
    pub fn read_name_list(&mut self, field: &'static str) -> ProtocolResult<Vec<String>> {
        let text = self.read_utf8(field)?;
        if !text.is_ascii() {
            return Err(ProtocolError::InvalidNameList(field));
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }
        text.split(',')
            .map(|name| {
                if name.is_empty() {
                    Err(ProtocolError::InvalidNameList(field))
                } else {
                    Ok(name.to_string())
                }
            })
            .collect()
    }

    /// `mpint` magnitude, returned without the sign-padding byte
    pub fn read_mpint(&mut self, field: &'static str) -> ProtocolResult<&'a [u8]> {
        let bytes = self.read_string(field)?;
        if bytes.first().is_some_and(|b| b & 0x80 != 0) {
            return Err(ProtocolError::NegativeMpint(field));
        }
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Ok(&bytes[start..])
    }
}

/// SSH encodings on top of [`BufMut`]
pub trait WireWriteExt: BufMut {
    fn put_ssh_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    fn put_ssh_string(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.put_slice(value);
    }

    fn put_name_list<S: AsRef<str>>(&mut self, names: &[S]) {
        let joined = names
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.put_ssh_string(joined.as_bytes());
    }

    /// Encode an unsigned big-endian magnitude as `mpint`
    fn put_mpint(&mut self, magnitude: &[u8]) {
        let start = magnitude
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(magnitude.len());
        let trimmed = &magnitude[start..];
        let needs_pad = trimmed.first().is_some_and(|b| b & 0x80 != 0);
        self.put_u32((trimmed.len() + usize::from(needs_pad)) as u32);
        if needs_pad {
            self.put_u8(0);
        }
        self.put_slice(trimmed);
    }
}

impl<B: BufMut + ?Sized> WireWriteExt for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_mpint_encoding_matches_rfc4251_examples() {
        let cases: [(&[u8], &[u8]); 4] = [
            (&[], &[0, 0, 0, 0]),
            (
                &[0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7],
                &[0, 0, 0, 8, 0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7],
            ),
            (&[0x80], &[0, 0, 0, 2, 0x00, 0x80]),
            (&[0x00, 0x00, 0x7f], &[0, 0, 0, 1, 0x7f]),
        ];

        for (magnitude, expected) in cases {
            let mut buf = BytesMut::new();
            buf.put_mpint(magnitude);
            assert_eq!(&buf[..], expected);

            let mut reader = WireReader::new(&buf);
            let decoded = reader.read_mpint("k").unwrap();
            let stripped: Vec<u8> = magnitude.iter().copied().skip_while(|b| *b == 0).collect();
            assert_eq!(decoded, stripped.as_slice());
        }
    }

    #[test]
    fn test_name_list_parsing() {
        let mut buf = BytesMut::new();
        buf.put_name_list(&["curve25519-sha256", "ecdh-sha2-nistp256"]);
        buf.put_name_list::<&str>(&[]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(
            reader.read_name_list("kex").unwrap(),
            vec!["curve25519-sha256", "ecdh-sha2-nistp256"]
        );
        assert!(reader.read_name_list("kex").unwrap().is_empty());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_name_list_rejects_empty_element() {
        let mut buf = BytesMut::new();
        buf.put_ssh_string(b"aes128-ctr,,aes256-ctr");
        let mut reader = WireReader::new(&buf);
        assert!(matches!(
            reader.read_name_list("ciphers"),
            Err(ProtocolError::InvalidNameList("ciphers"))
        ));
    }

    #[test]
    fn test_truncated_string() {
        let data = [0, 0, 0, 10, b'a', b'b'];
        let mut reader = WireReader::new(&data);
        assert!(matches!(
            reader.read_string("user"),
            Err(ProtocolError::Truncated { field: "user" })
        ));
    }
}
