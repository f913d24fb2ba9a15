use std::collections::{BTreeMap, HashMap};

/// A decoded server reply.
///
/// Simple strings and bulk strings both decode to [`Reply::Str`]; error
/// replies keep their own variant so callers can distinguish server-side
/// command errors from transport errors. `Null` covers both the null bulk
/// string and the null array, which is distinct from an empty [`Reply::Arr`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Null,
    Int(i64),
    Str(Vec<u8>),
    Err(String),
    Arr(Vec<Reply>),
}

impl Reply {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    pub fn is_arr(&self) -> bool {
        matches!(self, Self::Arr(_))
    }

    /// The integer value, if this is an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The raw bytes of a string reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Str(b) => Some(b),
            _ => None,
        }
    }

    /// The text of a string reply, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// The elements of an array reply.
    pub fn as_arr(&self) -> Option<&[Reply]> {
        match self {
            Self::Arr(elements) => Some(elements),
            _ => None,
        }
    }

    /// The error text of an error reply.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::Err(text) => Some(text),
            _ => None,
        }
    }

    /// An integer reply, or a string reply parsed as decimal integer.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    /// Whether this is the simple-string reply `OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Str(b) if b == b"OK")
    }

    /// Appends the wire framing of this reply to `out`.
    ///
    /// String replies are emitted in bulk form, so any decode of the result
    /// yields a tree equal to `self`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.extend_from_slice(b"$-1\r\n"),
            Self::Int(n) => out.extend_from_slice(format!(":{n}\r\n").as_bytes()),
            Self::Str(b) => {
                out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            Self::Err(text) => {
                out.push(b'-');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Arr(elements) => {
                out.extend_from_slice(format!("*{}\r\n", elements.len()).as_bytes());
                for element in elements {
                    element.encode(out);
                }
            }
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "(nil)"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Err(text) => write!(f, "(error) {text}"),
            Self::Arr(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Projection of a reply into a caller value.
///
/// This is the contract through which pipeline and async binders fill user
/// records: implement it for your type and bind a target of that type.
pub trait FromReply: Sized {
    /// Returns `None` if the reply does not have a usable shape.
    fn from_reply(reply: &Reply) -> Option<Self>;
}

impl FromReply for Reply {
    fn from_reply(reply: &Reply) -> Option<Self> {
        Some(reply.clone())
    }
}

impl FromReply for String {
    fn from_reply(reply: &Reply) -> Option<Self> {
        reply.as_str().map(ToOwned::to_owned)
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(reply: &Reply) -> Option<Self> {
        reply.as_bytes().map(ToOwned::to_owned)
    }
}

macro_rules! from_reply_via_parse {
    ($($t:ty),*) => {
        $(impl FromReply for $t {
            fn from_reply(reply: &Reply) -> Option<Self> {
                match reply {
                    Reply::Int(n) => <$t>::try_from(*n).ok(),
                    Reply::Str(b) => std::str::from_utf8(b).ok()?.parse().ok(),
                    _ => None,
                }
            }
        })*
    };
}
from_reply_via_parse!(i16, i32, i64, u16, u32, u64, usize);

macro_rules! from_reply_float {
    ($($t:ty),*) => {
        $(impl FromReply for $t {
            #[allow(clippy::cast_precision_loss)]
            fn from_reply(reply: &Reply) -> Option<Self> {
                match reply {
                    Reply::Int(n) => Some(*n as $t),
                    Reply::Str(b) => std::str::from_utf8(b).ok()?.parse().ok(),
                    _ => None,
                }
            }
        })*
    };
}
from_reply_float!(f32, f64);

/// `Null` projects to `None`, everything else through `T`.
///
/// Useful for MGET/HMGET style arrays whose elements may be null.
impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: &Reply) -> Option<Self> {
        match reply {
            Reply::Null => Some(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: &Reply) -> Option<Self> {
        reply.as_arr()?.iter().map(T::from_reply).collect()
    }
}

/// Pairwise array projection for dictionary shaped replies (HGETALL etc.).
impl<K, V> FromReply for HashMap<K, V>
where
    K: FromReply + std::hash::Hash + Eq,
    V: FromReply,
{
    fn from_reply(reply: &Reply) -> Option<Self> {
        pairwise(reply)
    }
}

impl<K, V> FromReply for BTreeMap<K, V>
where
    K: FromReply + Ord,
    V: FromReply,
{
    fn from_reply(reply: &Reply) -> Option<Self> {
        pairwise(reply)
    }
}

fn pairwise<K: FromReply, V: FromReply, M: FromIterator<(K, V)>>(reply: &Reply) -> Option<M> {
    let elements = reply.as_arr()?;
    elements
        .chunks_exact(2)
        .map(|pair| Some((K::from_reply(&pair[0])?, V::from_reply(&pair[1])?)))
        .collect()
}
