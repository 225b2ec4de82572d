use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("demuxer is not open")]
    NotOpen,

    #[error("no program found before end of input")]
    NoProgram,

    #[error("program map incomplete before end of input")]
    NoStreams,

    #[error("input stream is not seekable")]
    NotSeekable,
}

pub type Result<T> = std::result::Result<T, DemuxError>;
