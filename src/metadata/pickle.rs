//! Restricted decoder for legacy pickle-encoded metadata.
//!
//! Only plain data is understood: dicts, lists, tuples, strings, bytes,
//! integers, floats, booleans, and `None`, plus memo and framing opcodes.
//! Anything that could name a module or call an object (`GLOBAL`,
//! `STACK_GLOBAL`, `REDUCE`, `BUILD`, `INST`, `OBJ`, `NEWOBJ`,
//! `NEWOBJ_EX`, `EXT1/2/4`) is refused, as is any opcode not listed here.

use std::collections::HashMap;

use thiserror::Error;

use super::Metadata;

#[derive(Debug, Error, PartialEq)]
pub enum PickleError {
    #[error("forbidden pickle opcode {name} ({code:#04x}) at offset {offset}")]
    Forbidden {
        name: &'static str,
        code: u8,
        offset: usize,
    },

    #[error("unknown pickle opcode {code:#04x} at offset {offset}")]
    UnknownOpcode { code: u8, offset: usize },

    #[error("truncated pickle")]
    Truncated,

    #[error("malformed pickle: {0}")]
    Malformed(String),
}

/// A decoded pickle value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    fn into_key(self) -> Result<String, PickleError> {
        match self {
            Value::Str(s) => Ok(s),
            Value::Bytes(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(PickleError::Malformed(format!(
                "metadata key must be a string, got {other:?}"
            ))),
        }
    }

    fn into_text(self) -> Result<String, PickleError> {
        match self {
            Value::Str(s) => Ok(s),
            Value::Bytes(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(true) => Ok("True".to_string()),
            Value::Bool(false) => Ok("False".to_string()),
            Value::None => Ok("None".to_string()),
            other => Err(PickleError::Malformed(format!(
                "metadata value must be a scalar, got {other:?}"
            ))),
        }
    }
}

fn forbidden_name(code: u8) -> Option<&'static str> {
    Some(match code {
        b'c' => "GLOBAL",
        0x93 => "STACK_GLOBAL",
        b'R' => "REDUCE",
        b'b' => "BUILD",
        b'i' => "INST",
        b'o' => "OBJ",
        0x81 => "NEWOBJ",
        0x92 => "NEWOBJ_EX",
        0x82 => "EXT1",
        0x83 => "EXT2",
        0x84 => "EXT4",
        b'P' => "PERSID",
        b'Q' => "BINPERSID",
        _ => return None,
    })
}

struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Unpickler<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PickleError> {
        let end = self.pos.checked_add(n).ok_or(PickleError::Truncated)?;
        let bytes = self.data.get(self.pos..end).ok_or(PickleError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8, PickleError> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, PickleError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32, PickleError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, PickleError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    fn line(&mut self) -> Result<&'a [u8], PickleError> {
        let rest = &self.data[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(PickleError::Truncated)?;
        self.pos += nl + 1;
        Ok(&rest[..nl])
    }

    fn line_str(&mut self) -> Result<&'a str, PickleError> {
        let line = self.line()?;
        std::str::from_utf8(line).map_err(|_| PickleError::Malformed("non-ASCII argument".into()))
    }

    fn sized(&mut self, len: u64) -> Result<&'a [u8], PickleError> {
        let len = usize::try_from(len).map_err(|_| PickleError::Truncated)?;
        self.take(len)
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, PickleError> {
        if self.marks.last().is_some_and(|&m| m >= self.stack.len()) {
            return Err(PickleError::Malformed("pop across mark".into()));
        }
        self.stack
            .pop()
            .ok_or_else(|| PickleError::Malformed("stack underflow".into()))
    }

    fn top_mut(&mut self) -> Result<&mut Value, PickleError> {
        self.stack
            .last_mut()
            .ok_or_else(|| PickleError::Malformed("stack underflow".into()))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, PickleError> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| PickleError::Malformed("missing mark".into()))?;
        if mark > self.stack.len() {
            return Err(PickleError::Malformed("mark past stack".into()));
        }
        Ok(self.stack.split_off(mark))
    }

    fn memo_put(&mut self, key: u32) -> Result<(), PickleError> {
        let value = self
            .stack
            .last()
            .cloned()
            .ok_or_else(|| PickleError::Malformed("memoize on empty stack".into()))?;
        self.memo.insert(key, value);
        Ok(())
    }

    fn memo_get(&mut self, key: u32) -> Result<(), PickleError> {
        let value = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| PickleError::Malformed(format!("memo key {key} missing")))?;
        self.push(value);
        Ok(())
    }

    fn set_items(&mut self, items: Vec<Value>) -> Result<(), PickleError> {
        if items.len() % 2 != 0 {
            return Err(PickleError::Malformed("odd number of dict items".into()));
        }
        let Value::Dict(entries) = self.top_mut()? else {
            return Err(PickleError::Malformed("SETITEMS target is not a dict".into()));
        };
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            match entries.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = v,
                None => entries.push((k, v)),
            }
        }
        Ok(())
    }

    fn append_items(&mut self, items: Vec<Value>) -> Result<(), PickleError> {
        let Value::List(list) = self.top_mut()? else {
            return Err(PickleError::Malformed("APPENDS target is not a list".into()));
        };
        list.extend(items);
        Ok(())
    }

    fn run(mut self) -> Result<Value, PickleError> {
        loop {
            let offset = self.pos;
            let code = self.byte()?;
            if let Some(name) = forbidden_name(code) {
                return Err(PickleError::Forbidden { name, code, offset });
            }
            match code {
                // PROTO
                0x80 => {
                    self.byte()?;
                }
                // FRAME
                0x95 => {
                    self.u64_le()?;
                }
                // STOP
                b'.' => return self.pop(),
                b'(' => self.marks.push(self.stack.len()),
                b'0' => {
                    self.pop()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let top = self.top_mut()?.clone();
                    self.push(top);
                }

                b'N' => self.push(Value::None),
                0x88 => self.push(Value::Bool(true)),
                0x89 => self.push(Value::Bool(false)),

                b'I' => {
                    let text = self.line_str()?;
                    let value = match text {
                        "01" => Value::Bool(true),
                        "00" => Value::Bool(false),
                        _ => Value::Int(parse_int(text)?),
                    };
                    self.push(value);
                }
                b'L' => {
                    let text = self.line_str()?;
                    let value = parse_int(text.trim_end_matches('L'))?;
                    self.push(Value::Int(value));
                }
                b'J' => {
                    let b = self.take(4)?;
                    self.push(Value::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64));
                }
                b'K' => {
                    let b = self.byte()?;
                    self.push(Value::Int(b as i64));
                }
                b'M' => {
                    let v = self.u16_le()?;
                    self.push(Value::Int(v as i64));
                }
                0x8a => {
                    let n = self.byte()? as u64;
                    let bytes = self.sized(n)?;
                    self.push(Value::Int(decode_long(bytes)?));
                }
                0x8b => {
                    let n = self.u32_le()? as u64;
                    let bytes = self.sized(n)?;
                    self.push(Value::Int(decode_long(bytes)?));
                }
                b'F' => {
                    let text = self.line_str()?;
                    let value = text
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| PickleError::Malformed(format!("bad float {text:?}")))?;
                    self.push(Value::Float(value));
                }
                b'G' => {
                    let b = self.take(8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(b);
                    self.push(Value::Float(f64::from_be_bytes(buf)));
                }

                b'S' => {
                    let line = self.line()?;
                    let bytes = unquote_string(line)?;
                    self.push(Value::Str(String::from_utf8_lossy(&bytes).into_owned()));
                }
                b'T' => {
                    let n = self.u32_le()? as u64;
                    let bytes = self.sized(n)?;
                    self.push(Value::Str(String::from_utf8_lossy(bytes).into_owned()));
                }
                b'U' => {
                    let n = self.byte()? as u64;
                    let bytes = self.sized(n)?;
                    self.push(Value::Str(String::from_utf8_lossy(bytes).into_owned()));
                }
                b'V' => {
                    let line = self.line()?;
                    self.push(Value::Str(raw_unicode_unescape(line)?));
                }
                b'X' | 0x8c | 0x8d => {
                    let n = match code {
                        b'X' => self.u32_le()? as u64,
                        0x8c => self.byte()? as u64,
                        _ => self.u64_le()?,
                    };
                    let bytes = self.sized(n)?;
                    let text = std::str::from_utf8(bytes)
                        .map_err(|_| PickleError::Malformed("invalid UTF-8 in unicode".into()))?;
                    self.push(Value::Str(text.to_string()));
                }
                b'B' | b'C' | 0x8e => {
                    let n = match code {
                        b'B' => self.u32_le()? as u64,
                        b'C' => self.byte()? as u64,
                        _ => self.u64_le()?,
                    };
                    let bytes = self.sized(n)?;
                    self.push(Value::Bytes(bytes.to_vec()));
                }

                b'}' => self.push(Value::Dict(Vec::new())),
                b'd' => {
                    let items = self.pop_mark()?;
                    self.push(Value::Dict(Vec::new()));
                    self.set_items(items)?;
                }
                b's' => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.set_items(vec![key, value])?;
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    self.set_items(items)?;
                }
                b']' => self.push(Value::List(Vec::new())),
                b'l' => {
                    let items = self.pop_mark()?;
                    self.push(Value::List(items));
                }
                b'a' => {
                    let item = self.pop()?;
                    self.append_items(vec![item])?;
                }
                b'e' => {
                    let items = self.pop_mark()?;
                    self.append_items(items)?;
                }
                b')' => self.push(Value::Tuple(Vec::new())),
                b't' => {
                    let items = self.pop_mark()?;
                    self.push(Value::Tuple(items));
                }
                0x85..=0x87 => {
                    let n = (code - 0x84) as usize;
                    if self.stack.len() < n {
                        return Err(PickleError::Malformed("stack underflow".into()));
                    }
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.push(Value::Tuple(items));
                }

                b'p' => {
                    let key = parse_int(self.line_str()?)?;
                    self.memo_put(key as u32)?;
                }
                b'q' => {
                    let key = self.byte()? as u32;
                    self.memo_put(key)?;
                }
                b'r' => {
                    let key = self.u32_le()?;
                    self.memo_put(key)?;
                }
                0x94 => {
                    let key = self.memo.len() as u32;
                    self.memo_put(key)?;
                }
                b'g' => {
                    let key = parse_int(self.line_str()?)?;
                    self.memo_get(key as u32)?;
                }
                b'h' => {
                    let key = self.byte()? as u32;
                    self.memo_get(key)?;
                }
                b'j' => {
                    let key = self.u32_le()?;
                    self.memo_get(key)?;
                }

                _ => return Err(PickleError::UnknownOpcode { code, offset }),
            }
        }
    }
}

fn parse_int(text: &str) -> Result<i64, PickleError> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| PickleError::Malformed(format!("bad integer {text:?}")))
}

/// Little-endian two's-complement integer of at most eight bytes.
fn decode_long(bytes: &[u8]) -> Result<i64, PickleError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(PickleError::Malformed("integer wider than 64 bits".into()));
    }
    let fill = if bytes[bytes.len() - 1] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

/// Decode the quoted, backslash-escaped argument of `STRING`.
fn unquote_string(line: &[u8]) -> Result<Vec<u8>, PickleError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let inner = match line {
        [q, inner @ .., end] if (*q == b'\'' || *q == b'"') && q == end => inner,
        _ => return Err(PickleError::Malformed("STRING argument is not quoted".into())),
    };
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        let c = inner[i];
        i += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let esc = *inner.get(i).ok_or(PickleError::Truncated)?;
        i += 1;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'x' => {
                let hex = inner.get(i..i + 2).ok_or(PickleError::Truncated)?;
                let text = std::str::from_utf8(hex)
                    .map_err(|_| PickleError::Malformed("bad \\x escape".into()))?;
                let byte = u8::from_str_radix(text, 16)
                    .map_err(|_| PickleError::Malformed("bad \\x escape".into()))?;
                out.push(byte);
                i += 2;
            }
            b'0'..=b'7' => {
                let mut value = (esc - b'0') as u32;
                for _ in 0..2 {
                    match inner.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            value = value * 8 + (d - b'0') as u32;
                            i += 1;
                        }
                        _ => break,
                    }
                }
                out.push((value & 0xff) as u8);
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decode the `raw-unicode-escape` argument of `UNICODE`.
fn raw_unicode_unescape(line: &[u8]) -> Result<String, PickleError> {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let c = line[i];
        if c == b'\\' && matches!(line.get(i + 1), Some(b'u') | Some(b'U')) {
            let width = if line[i + 1] == b'u' { 4 } else { 8 };
            let hex = line
                .get(i + 2..i + 2 + width)
                .ok_or(PickleError::Truncated)?;
            let text = std::str::from_utf8(hex)
                .map_err(|_| PickleError::Malformed("bad unicode escape".into()))?;
            let code = u32::from_str_radix(text, 16)
                .map_err(|_| PickleError::Malformed("bad unicode escape".into()))?;
            let ch = char::from_u32(code)
                .ok_or_else(|| PickleError::Malformed("invalid code point".into()))?;
            out.push(ch);
            i += 2 + width;
        } else {
            // Everything else is latin-1.
            out.push(c as char);
            i += 1;
        }
    }
    Ok(out)
}

/// Decode a pickle into a [`Value`], refusing anything but plain data.
pub fn loads(data: &[u8]) -> Result<Value, PickleError> {
    Unpickler::new(data).run()
}

/// Decode a pickled `dict` of scalars into metadata.
pub fn loads_metadata(data: &[u8]) -> Result<Metadata, PickleError> {
    match loads(data)? {
        Value::Dict(entries) => {
            let mut out = Metadata::new();
            for (k, v) in entries {
                out.insert(k.into_key()?, v.into_text()?);
            }
            Ok(out)
        }
        other => Err(PickleError::Malformed(format!(
            "expected a dict, got {other:?}"
        ))),
    }
}

/// True when `blob` looks like a pickle rather than JSON.
pub fn looks_pickled(blob: &[u8]) -> bool {
    matches!(blob.first(), Some(0x80) | Some(b'(') | Some(b'}'))
        && blob.last() == Some(&b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol0_dict() {
        let meta = loads_metadata(b"(dp0\nS'a'\np1\nS'b'\np2\ns.").unwrap();
        assert_eq!(meta.get("a").map(String::as_str), Some("b"));
        assert_eq!(meta.len(), 1);
    }

    #[test]
    fn test_protocol2_dict() {
        let data = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01X\x01\x00\x00\x00bq\x02u.";
        let meta = loads_metadata(data).unwrap();
        assert_eq!(meta.get("a").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_protocol4_frame_and_memoize() {
        // pickle.dumps({'Content-Length': 4, 'ok': True}, protocol=4)
        let data = b"\x80\x04\x95\x1e\x00\x00\x00\x00\x00\x00\x00}\x94(\x8c\x0eContent-Length\x94K\x04\x8c\x02ok\x94\x88u.";
        let meta = loads_metadata(data).unwrap();
        assert_eq!(meta.get("Content-Length").map(String::as_str), Some("4"));
        assert_eq!(meta.get("ok").map(String::as_str), Some("True"));
    }

    #[test]
    fn test_escaped_protocol0_string() {
        let meta = loads_metadata(b"(dp0\nS'k'\np1\nS'it\\'s\\x41'\np2\ns.").unwrap();
        assert_eq!(meta.get("k").map(String::as_str), Some("it'sA"));
    }

    #[test]
    fn test_global_rejected() {
        // cos\nsystem\n(S'echo hi'\ntR.
        let err = loads(b"cos\nsystem\n(S'echo hi'\ntR.").unwrap_err();
        assert_eq!(
            err,
            PickleError::Forbidden {
                name: "GLOBAL",
                code: b'c',
                offset: 0
            }
        );
    }

    #[test]
    fn test_reduce_and_friends_rejected() {
        for (code, name) in [
            (b'R', "REDUCE"),
            (b'b', "BUILD"),
            (b'o', "OBJ"),
            (b'i', "INST"),
            (0x81, "NEWOBJ"),
            (0x92, "NEWOBJ_EX"),
            (0x93, "STACK_GLOBAL"),
            (0x82, "EXT1"),
            (0x83, "EXT2"),
            (0x84, "EXT4"),
        ] {
            let data = [b'N', code, b'.'];
            match loads(&data) {
                Err(PickleError::Forbidden { name: got, .. }) => assert_eq!(got, name),
                other => panic!("opcode {code:#x} not rejected: {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        assert!(matches!(
            loads(b"N\xff."),
            Err(PickleError::UnknownOpcode { code: 0xff, .. })
        ));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(loads(b"\x80\x02}q"), Err(PickleError::Truncated));
    }

    #[test]
    fn test_non_dict_is_not_metadata() {
        assert!(loads_metadata(b"]q\x00.").is_err());
    }

    #[test]
    fn test_negative_long1() {
        // LONG1 of -2 in one byte.
        assert_eq!(loads(b"\x8a\x01\xfe.").unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_looks_pickled() {
        assert!(looks_pickled(b"\x80\x02}q\x00."));
        assert!(looks_pickled(b"(dp0\ns."));
        assert!(!looks_pickled(b"{\"a\": \"b\"}"));
    }
}
