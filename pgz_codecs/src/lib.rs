mod gzip_codec;

pub use gzip_codec::{GzipCodec, DEFAULT_LEVEL};
