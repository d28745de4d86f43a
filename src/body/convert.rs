use std::borrow::Cow;

use bytes::Bytes;
use bytestr::ByteStr;

use super::Body;
use crate::blob::Blob;
use crate::stream::ByteStream;

macro_rules! from_bytes {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Body {
                fn from(data: $ty) -> Self {
                    Body::from_bytes(data)
                }
            }
        )*
    };
}
from_bytes!(Bytes, Vec<u8>, Box<[u8]>);

macro_rules! from_text {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Body {
                fn from(text: $ty) -> Self {
                    Body::from_text(text)
                }
            }
        )*
    };
}
from_text!(ByteStr, String, &'static str);

impl From<&[u8]> for Body {
    fn from(data: &[u8]) -> Self {
        Body::from_bytes(Bytes::copy_from_slice(data))
    }
}

impl<'a> From<Cow<'a, str>> for Body {
    fn from(text: Cow<'a, str>) -> Self {
        Body::from_text(text.into_owned())
    }
}

impl From<Blob> for Body {
    fn from(blob: Blob) -> Self {
        Body::from_blob(blob)
    }
}

impl From<ByteStream> for Body {
    fn from(stream: ByteStream) -> Self {
        Body::from_stream(stream)
    }
}

impl From<Option<Body>> for Body {
    fn from(body: Option<Body>) -> Self {
        body.unwrap_or_default()
    }
}
