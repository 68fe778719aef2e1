//! Size-checked decoding of raw perf records into [`BindEvent`]s.

use crate::errors::{BindsnoopError, Result};
use bindsnoop_common::BindEvent;
use std::mem::size_of;

pub struct BindEventParser;

impl BindEventParser {
    /// Decodes one record. Trailing bytes (perf pads records to 8 bytes) are
    /// ignored.
    pub fn parse(buffer: &[u8]) -> Result<BindEvent> {
        Self::check_buffer_size(buffer, size_of::<BindEvent>())?;

        // BindEvent is plain old data and the length was checked above.
        let event = unsafe { buffer.as_ptr().cast::<BindEvent>().read_unaligned() };
        Ok(event)
    }

    fn check_buffer_size(buffer: &[u8], required_size: usize) -> Result<()> {
        if buffer.is_empty() {
            return Err(BindsnoopError::EventParsing {
                message: "Empty buffer provided for event parsing".to_string(),
            });
        }

        if buffer.len() < required_size {
            return Err(BindsnoopError::EventParsing {
                message: format!(
                    "Buffer size {} is smaller than required size {}",
                    buffer.len(),
                    required_size
                ),
            });
        }

        Ok(())
    }
}
