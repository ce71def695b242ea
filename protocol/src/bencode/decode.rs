use super::error::DecodeError;
use super::value::{Dict, Value};

/// Maximum nesting of lists and dictionaries accepted by [`decode`].
///
/// Inputs come straight off the network, so recursion is bounded rather than
/// letting an adversarial `llllll...` datagram exhaust the stack.
pub const MAX_DEPTH: usize = 64;

/// Decodes exactly one bencode value spanning all of `data`.
///
/// # Errors
///
/// * [`DecodeError::UnexpectedEof`] - The input is truncated, including a byte
///   string whose declared length exceeds the remaining bytes.
/// * [`DecodeError::TrailingData`] - Bytes remain after the value.
/// * Any other [`DecodeError`] for malformed lengths, integers, keys or nesting.
pub fn decode(data: &[u8]) -> Result<Value, DecodeError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value(0)?;

    if decoder.pos != data.len() {
        return Err(DecodeError::TrailingData {
            position: decoder.pos,
        });
    }

    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, DecodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::NestingTooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.byte_string().map(Value::Bytes),
            byte => Err(DecodeError::UnexpectedByte {
                byte,
                position: self.pos,
            }),
        }
    }

    /// Scans forward to `terminator`, returning the digits before it.
    fn until(&mut self, terminator: u8) -> Result<&'a [u8], DecodeError> {
        let data = self.data;
        let start = self.pos;
        let offset = data[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos = start + offset + 1;
        Ok(&data[start..start + offset])
    }

    fn integer(&mut self) -> Result<Value, DecodeError> {
        let position = self.pos;
        self.pos += 1;
        let digits = self.until(b'e')?;

        let (negative, magnitude) = match digits.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, digits),
        };
        let well_formed = !magnitude.is_empty()
            && magnitude.iter().all(u8::is_ascii_digit)
            && !(magnitude.len() > 1 && magnitude[0] == b'0')
            && !(negative && magnitude == b"0");
        if !well_formed {
            return Err(DecodeError::InvalidInteger { position });
        }

        // Digits were validated above so this only fails on overflow.
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::Integer)
            .ok_or(DecodeError::InvalidInteger { position })
    }

    fn byte_string(&mut self) -> Result<Vec<u8>, DecodeError> {
        let position = self.pos;
        let digits = self.until(b':')?;

        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return Err(DecodeError::InvalidLength { position });
        }
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(DecodeError::InvalidLength { position })?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof)?;
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.pos += 1;
        let mut list = Vec::new();

        while self.peek()? != b'e' {
            list.push(self.value(depth + 1)?);
        }
        self.pos += 1;

        Ok(Value::List(list))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.pos += 1;
        let mut dict = Dict::new();

        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(DecodeError::NonStringKey { position: self.pos });
            }
            let key = self.byte_string()?;
            let value = self.value(depth + 1)?;
            dict.insert(key, value);
        }
        self.pos += 1;

        Ok(Value::Dict(dict))
    }
}
