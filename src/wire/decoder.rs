//! Binary decoder for stanzas.

/// Error type for decoding
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError(pub String);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decode error: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

/// Cursor reader over a stanza payload.
pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    /// Create a new decoder
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    /// Error unless every byte was consumed
    pub fn expect_end(&self) -> Result<(), DecodeError> {
        if self.index != self.data.len() {
            return Err(DecodeError(format!(
                "{} leftover bytes after decoding",
                self.data.len() - self.index
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.index + n > self.data.len() {
            return Err(DecodeError("unexpected end of data".to_string()));
        }
        let slice = &self.data[self.index..self.index + n];
        self.index += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(buf))
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(DecodeError(format!("invalid bool byte: 0x{:02x}", other))),
        }
    }

    /// Length-prefixed UTF-8 string (u16 length)
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DecodeError(format!("invalid utf8: {}", e)))
    }

    /// Optional string: presence flag + string
    pub fn read_opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    /// Optional i64: presence flag + value
    pub fn read_opt_i64(&mut self) -> Result<Option<i64>, DecodeError> {
        if self.read_bool()? {
            Ok(Some(self.read_i64()?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Encoder;

    #[test]
    fn test_roundtrip_scalars() {
        let mut enc = Encoder::new();
        enc.write_u8(7);
        enc.write_u16(300);
        enc.write_u32(70_000);
        enc.write_u64(u64::MAX);
        enc.write_i64(-5);
        enc.write_bool(true);
        enc.write_string("héllo");
        enc.write_opt_string(None);
        enc.write_opt_i64(Some(-1));
        let bytes = enc.into_bytes();

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_u8().unwrap(), 7);
        assert_eq!(dec.read_u16().unwrap(), 300);
        assert_eq!(dec.read_u32().unwrap(), 70_000);
        assert_eq!(dec.read_u64().unwrap(), u64::MAX);
        assert_eq!(dec.read_i64().unwrap(), -5);
        assert!(dec.read_bool().unwrap());
        assert_eq!(dec.read_string().unwrap(), "héllo");
        assert_eq!(dec.read_opt_string().unwrap(), None);
        assert_eq!(dec.read_opt_i64().unwrap(), Some(-1));
        dec.expect_end().unwrap();
    }

    #[test]
    fn test_truncated_read() {
        let mut dec = Decoder::new(&[0, 5, b'a']);
        assert!(dec.read_string().is_err());
    }

    #[test]
    fn test_leftover_bytes() {
        let mut dec = Decoder::new(&[1, 2]);
        dec.read_u8().unwrap();
        assert!(dec.expect_end().is_err());
    }

    #[test]
    fn test_invalid_bool() {
        let mut dec = Decoder::new(&[9]);
        assert!(dec.read_bool().is_err());
    }
}
