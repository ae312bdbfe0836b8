use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not enough data: {len} bytes at offset {offset} extend past the end of the image")]
    NotEnoughData { offset: u64, len: usize },
    #[error("invalid image: {0}")]
    InvalidImage(&'static str),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("unsupported file system type 0x{0:02X}")]
    UnsupportedFs(u8),
    #[error("recovery failed: {0}")]
    RecoverFailed(&'static str),
    #[error("partial recovery: {written} of {expected} bytes written ({reason})")]
    PartialRecovery {
        written: u64,
        expected: u64,
        reason: String,
    },
    #[error("IO: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
