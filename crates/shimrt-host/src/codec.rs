//! Compact tagged binary serialization, exposed as the `pickle` module.
//!
//! Each value is a one-byte tag followed by its body. Lengths and counts are
//! little-endian `u32`, machine integers `i64`, floats IEEE `f64`, and
//! arbitrary-precision integers their signed little-endian bytes.

use num_bigint::BigInt;
use shimrt_core::{Host, HostError, HostResult, ObjRef, Owned};

use crate::ReferenceHost;
use crate::native::NativeFn;
use crate::object::Payload;

const TAG_NONE: u8 = b'N';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT: u8 = b'i';
const TAG_LONG: u8 = b'l';
const TAG_FLOAT: u8 = b'f';
const TAG_BYTES: u8 = b's';
const TAG_UNICODE: u8 = b'u';
const TAG_BYTEARRAY: u8 = b'b';
const TAG_TUPLE: u8 = b'(';
const TAG_LIST: u8 = b'[';
const TAG_DICT: u8 = b'{';

enum Node {
    Leaf(Vec<u8>),
    Seq(u8, Vec<ObjRef>),
    Map(Vec<(ObjRef, ObjRef)>),
}

fn put_len(out: &mut Vec<u8>, len: usize) -> HostResult<()> {
    let len = u32::try_from(len).map_err(|_| HostError::value("object too large to pickle"))?;
    out.extend_from_slice(&len.to_le_bytes());
    Ok(())
}

fn tagged(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Serialize `obj` and everything it contains.
pub fn encode(host: &ReferenceHost, obj: ObjRef, out: &mut Vec<u8>) -> HostResult<()> {
    let node = host
        .with_payload(obj, |payload| match payload {
            Payload::None => Some(Node::Leaf(vec![TAG_NONE])),
            Payload::Bool(true) => Some(Node::Leaf(vec![TAG_TRUE])),
            Payload::Bool(false) => Some(Node::Leaf(vec![TAG_FALSE])),
            Payload::Int(v) => {
                let mut leaf = vec![TAG_INT];
                leaf.extend_from_slice(&v.to_le_bytes());
                Some(Node::Leaf(leaf))
            }
            Payload::Long(v) => Some(Node::Leaf(tagged(TAG_LONG, &v.to_signed_bytes_le()))),
            Payload::Float(v) => {
                let mut leaf = vec![TAG_FLOAT];
                leaf.extend_from_slice(&v.to_le_bytes());
                Some(Node::Leaf(leaf))
            }
            Payload::Bytes(b) => Some(Node::Leaf(tagged(TAG_BYTES, b))),
            Payload::Unicode(s) => Some(Node::Leaf(tagged(TAG_UNICODE, s.as_bytes()))),
            Payload::ByteArray(b) => Some(Node::Leaf(tagged(TAG_BYTEARRAY, b))),
            Payload::Tuple(items) => Some(Node::Seq(TAG_TUPLE, items.clone())),
            Payload::List(items) => Some(Node::Seq(TAG_LIST, items.clone())),
            Payload::Dict(dict) => Some(Node::Map(dict.entries().to_vec())),
            _ => None,
        })
        .flatten()
        .ok_or_else(|| {
            HostError::type_error(format!("can't pickle {} objects", host.type_name_of(obj)))
        })?;

    match node {
        Node::Leaf(bytes) => out.extend_from_slice(&bytes),
        Node::Seq(tag, items) => {
            out.push(tag);
            put_len(out, items.len())?;
            for item in items {
                encode(host, item, out)?;
            }
        }
        Node::Map(entries) => {
            out.push(TAG_DICT);
            put_len(out, entries.len())?;
            for (key, value) in entries {
                encode(host, key, out)?;
                encode(host, value, out)?;
            }
        }
    }
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> HostResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| HostError::value("pickle data was truncated"))?;
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn byte(&mut self) -> HostResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn len(&mut self) -> HostResult<usize> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| HostError::value("pickle data was truncated"))?;
        Ok(u32::from_le_bytes(bytes) as usize)
    }

    fn word(&mut self) -> HostResult<[u8; 8]> {
        self.take(8)?
            .try_into()
            .map_err(|_| HostError::value("pickle data was truncated"))
    }

    fn sized(&mut self) -> HostResult<&'a [u8]> {
        let len = self.len()?;
        self.take(len)
    }
}

fn decode_value<'h>(host: &'h ReferenceHost, reader: &mut Reader<'_>) -> HostResult<Owned<'h, ReferenceHost>> {
    let tag = reader.byte()?;
    let value = match tag {
        TAG_NONE => Owned::borrowed(host, host.none()),
        TAG_TRUE => Owned::borrowed(host, host.true_object()),
        TAG_FALSE => Owned::borrowed(host, host.false_object()),
        TAG_INT => host.own(host.new_int(i64::from_le_bytes(reader.word()?))?),
        TAG_LONG => host.own(host.new_integer(BigInt::from_signed_bytes_le(reader.sized()?))),
        TAG_FLOAT => host.own(host.new_float(f64::from_le_bytes(reader.word()?))),
        TAG_BYTES => host.own(host.new_bytes(reader.sized()?)?),
        TAG_UNICODE => {
            let text = std::str::from_utf8(reader.sized()?)
                .map_err(|_| HostError::value("invalid UTF-8 in pickled unicode"))?;
            host.own(host.new_unicode(text))
        }
        TAG_BYTEARRAY => host.own(host.new_bytearray(reader.sized()?)),
        TAG_TUPLE | TAG_LIST => {
            let count = reader.len()?;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                items.push(decode_value(host, reader)?);
            }
            let refs: Vec<ObjRef> = items.iter().map(Owned::get).collect();
            if tag == TAG_TUPLE {
                host.own(host.new_tuple(&refs)?)
            } else {
                for item in &refs {
                    host.incref(*item);
                }
                host.own(host.new_list_from(refs))
            }
        }
        TAG_DICT => {
            let count = reader.len()?;
            let dict = host.own(host.new_dict());
            for _ in 0..count {
                let key = decode_value(host, reader)?;
                let value = decode_value(host, reader)?;
                host.set_item(dict.get(), key.get(), value.get())?;
            }
            dict
        }
        other => {
            return Err(HostError::value(format!(
                "invalid load key, '{}'.",
                other as char
            )));
        }
    };
    Ok(value)
}

/// Deserialize one value; the whole input must be consumed.
pub fn decode(host: &ReferenceHost, data: &[u8]) -> HostResult<ObjRef> {
    let mut reader = Reader { data, position: 0 };
    let value = decode_value(host, &mut reader)?;
    if reader.position != data.len() {
        return Err(HostError::value("trailing data after pickled value"));
    }
    Ok(value.into_raw())
}

fn bytes_argument(host: &ReferenceHost, obj: ObjRef) -> HostResult<Vec<u8>> {
    host.with_payload(obj, |payload| match payload {
        Payload::Bytes(b) | Payload::Buffer(b) | Payload::ByteArray(b) => Some(b.clone()),
        _ => None,
    })
    .flatten()
    .ok_or_else(|| {
        HostError::type_error(format!(
            "loads() argument 1 must be string, not {}",
            host.type_name_of(obj)
        ))
    })
}

fn loads(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    let [data] = args else {
        return Err(HostError::type_error("loads() takes exactly 1 argument"));
    };
    decode(host, &bytes_argument(host, *data)?)
}

fn dumps(host: &ReferenceHost, args: &[ObjRef]) -> HostResult<ObjRef> {
    let Some(obj) = args.first() else {
        return Err(HostError::type_error("dumps() takes at least 1 argument"));
    };
    let mut out = Vec::new();
    encode(host, *obj, &mut out)?;
    host.new_bytes(&out)
}

/// Register `pickle` and `cPickle` with the import machinery.
pub fn register_pickle(host: &ReferenceHost) {
    for name in ["pickle", "cPickle"] {
        host.register_module(name, |host, module| {
            for function in [NativeFn::new("loads", loads), NativeFn::new("dumps", dumps)] {
                let name = function.name;
                let object = host.own(host.new_builtin(function));
                host.set_attr(module, name, object.get())?;
            }
            Ok(())
        });
    }
}

impl ReferenceHost {
    /// Serialize a value the way `pickle.dumps` does.
    pub fn dumps(&self, obj: ObjRef) -> HostResult<Vec<u8>> {
        let mut out = Vec::new();
        encode(self, obj, &mut out)?;
        Ok(out)
    }

    /// Deserialize a value the way `pickle.loads` does.
    pub fn loads(&self, data: &[u8]) -> HostResult<ObjRef> {
        decode(self, data)
    }
}
