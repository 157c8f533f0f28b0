use crate::error::ApiError;

/// Maximum text length for speak requests
const MAX_TEXT_LENGTH: usize = 5000;

/// Validate free-text speak request
pub fn validate_speak_request(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// Validate WAV render block length
pub fn validate_block_len(block_len: usize) -> Result<(), ApiError> {
    if !(1..=65_536).contains(&block_len) {
        return Err(ApiError::InvalidInput(format!(
            "Invalid block length {}: expected 1..=65536",
            block_len
        )));
    }
    Ok(())
}
