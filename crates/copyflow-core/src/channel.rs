//! Bounded transfer channel configuration.
//!
//! The producer and the COPY consumer are joined by a bounded queue of
//! byte chunks. Its capacity is the only memory the pipeline holds beyond
//! one chunk in each task's hand, so it must stay small and finite.

use crate::Error;

/// Default number of chunks buffered between producer and consumer.
pub const DEFAULT_CAPACITY: usize = 4;

/// Minimum capacity (a zero-capacity channel cannot make progress).
pub const MIN_CAPACITY: usize = 1;

/// Maximum capacity (prevent effectively unbounded buffering).
pub const MAX_CAPACITY: usize = 1024;

/// Default size of a producer chunk, close to one `CopyData` frame.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Default read size when streaming a dataset file.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 1024 * 1024;

/// Configuration for the producer-to-sink channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Number of chunks the channel holds before the producer suspends.
    pub capacity: usize,

    /// Target size of producer-generated chunks.
    pub chunk_bytes: usize,

    /// Read size for file-backed sources.
    pub read_chunk_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration with the given capacity, clamped to the
    /// supported range.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the capacity is out of range or a
    /// chunk size is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.capacity) {
            return Err(Error::InvalidConfig(format!(
                "channel capacity must be in {MIN_CAPACITY}..={MAX_CAPACITY}, got {}",
                self.capacity
            )));
        }
        if self.chunk_bytes == 0 {
            return Err(Error::InvalidConfig("chunk_bytes must be > 0".into()));
        }
        if self.read_chunk_bytes == 0 {
            return Err(Error::InvalidConfig("read_chunk_bytes must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for `ChannelConfig`.
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    capacity: Option<usize>,
    chunk_bytes: Option<usize>,
    read_chunk_bytes: Option<usize>,
}

impl ChannelConfigBuilder {
    /// Sets the channel capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the producer chunk size.
    #[must_use]
    pub fn chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = Some(bytes);
        self
    }

    /// Sets the file read size.
    #[must_use]
    pub fn read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = Some(bytes);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChannelConfig {
        let defaults = ChannelConfig::default();
        ChannelConfig {
            capacity: self
                .capacity
                .unwrap_or(defaults.capacity)
                .clamp(MIN_CAPACITY, MAX_CAPACITY),
            chunk_bytes: self.chunk_bytes.unwrap_or(defaults.chunk_bytes),
            read_chunk_bytes: self.read_chunk_bytes.unwrap_or(defaults.read_chunk_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.chunk_bytes, DEFAULT_CHUNK_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_capacity_clamps() {
        assert_eq!(ChannelConfig::with_capacity(0).capacity, MIN_CAPACITY);
        assert_eq!(ChannelConfig::with_capacity(1 << 20).capacity, MAX_CAPACITY);
        assert_eq!(ChannelConfig::with_capacity(8).capacity, 8);
    }

    #[test]
    fn test_builder() {
        let config = ChannelConfig::builder()
            .capacity(16)
            .chunk_bytes(4096)
            .read_chunk_bytes(8192)
            .build();
        assert_eq!(config.capacity, 16);
        assert_eq!(config.chunk_bytes, 4096);
        assert_eq!(config.read_chunk_bytes, 8192);
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let config = ChannelConfig {
            chunk_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unclamped_capacity() {
        let config = ChannelConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
