use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK, MAX_CHUNK_SIZE,
};

/// Chunking and flow-control parameters shared by sender and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    /// Payload bytes per data frame.
    pub chunk_size: usize,
    /// The sender suspends while the data channel buffers more than this.
    pub high_water_mark: usize,
    /// Buffered-amount-low threshold set on the data channel.
    pub low_water_mark: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ProtocolError::InvalidConfig(format!(
                "chunkSize {} out of range 1..={MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.low_water_mark >= self.high_water_mark {
            return Err(ProtocolError::InvalidConfig(format!(
                "lowWaterMark {} must be below highWaterMark {}",
                self.low_water_mark, self.high_water_mark
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.chunk_size, 250 * 1024);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TransferConfig = serde_json::from_str(r#"{"chunkSize":65536}"#).unwrap();
        assert_eq!(cfg.chunk_size, 65536);
        assert_eq!(cfg.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn rejects_zero_and_oversized_chunks() {
        let mut cfg = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_water_marks() {
        let cfg = TransferConfig {
            low_water_mark: 8 * 1024 * 1024,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ProtocolError::InvalidConfig(_))));
    }
}
