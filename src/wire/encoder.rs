//! Binary encoder for stanzas.

/// Append-only buffer writer for the stanza wire format.
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Consume the encoder and return the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(if v { 1 } else { 0 });
    }

    /// Length-prefixed UTF-8 string (u16 length)
    pub fn write_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        debug_assert!(bytes.len() <= u16::MAX as usize, "string too long for wire");
        self.write_u16(bytes.len() as u16);
        self.data.extend_from_slice(bytes);
    }

    /// Optional string: presence flag + string
    pub fn write_opt_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.write_bool(true);
                self.write_string(s);
            }
            None => self.write_bool(false),
        }
    }

    /// Optional i64: presence flag + value
    pub fn write_opt_i64(&mut self, v: Option<i64>) {
        match v {
            Some(v) => {
                self.write_bool(true);
                self.write_i64(v);
            }
            None => self.write_bool(false),
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        let mut enc = Encoder::new();
        enc.write_u8(0xab);
        enc.write_u16(0x0102);
        enc.write_u64(1);
        enc.write_bool(true);

        let bytes = enc.into_bytes();
        assert_eq!(bytes[0], 0xab);
        assert_eq!(&bytes[1..3], &[0x01, 0x02]);
        assert_eq!(bytes.len(), 1 + 2 + 8 + 1);
        assert_eq!(bytes[11], 1);
    }

    #[test]
    fn test_string_prefix() {
        let mut enc = Encoder::new();
        enc.write_string("hi");
        assert_eq!(enc.into_bytes(), vec![0, 2, b'h', b'i']);
    }

    #[test]
    fn test_opt_string() {
        let mut enc = Encoder::new();
        enc.write_opt_string(None);
        enc.write_opt_string(Some("x"));
        assert_eq!(enc.into_bytes(), vec![0, 1, 0, 1, b'x']);
    }
}
