use thiserror::Error;

/// Errors raised by the speech pipeline
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Button table error on line {line}: {msg}")]
    Table { line: usize, msg: String },

    #[error("Provider error: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("Synthesis canceled: {0}")]
    Canceled(String),

    #[error("A synthesis request is already in flight")]
    Busy,

    #[error("Audio sink error: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, SpeechError>;
