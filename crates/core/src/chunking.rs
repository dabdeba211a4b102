use crate::error::IngestError;
use crate::models::IngestionOptions;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            overlap: value.chunk_overlap,
        }
    }
}

impl ChunkingConfig {
    /// Distance between the starts of two consecutive windows.
    pub fn step(&self) -> Result<usize, IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.chunk_size <= self.overlap {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk size {} must exceed overlap {}",
                self.chunk_size, self.overlap
            )));
        }
        Ok(self.chunk_size - self.overlap)
    }
}

/// Splits `text` into fixed-size character windows that overlap by
/// `config.overlap` characters. The final window always ends at the end of the
/// text; windows that are blank after trimming are dropped.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    let step = config.step()?;
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            chunks.push(piece);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    Ok(chunks)
}
