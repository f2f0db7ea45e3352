use byteorder::{ByteOrder, LittleEndian};

use crate::config::ConfigSpc;
use crate::converter::StdEventConverter;
use crate::error::ConvertError;
use crate::event::Event;
use crate::standard_event::StandardEvent;

const DEFAULT_BCID_WIDTH: u32 = 3;

/// Copies a bunch crossing id from block 0 into a StandardEvent tag.
///
/// The id is a little-endian u32 masked to `BcidWidth` bits (default 3). An event without
/// block 0 is accepted and leaves the tag unset, which downstream reads as a missing sample.
#[derive(Debug, Clone)]
pub struct BcidTagConverter {
    tag: &'static str,
    mask: u32,
}

impl BcidTagConverter {
    pub fn new(tag: &'static str, conf: ConfigSpc) -> Self {
        let width = conf
            .map(|c| c.get("BcidWidth", DEFAULT_BCID_WIDTH))
            .unwrap_or(DEFAULT_BCID_WIDTH)
            .min(32);
        let mask = if width == 32 {
            u32::MAX
        } else {
            (1u32 << width) - 1
        };
        Self { tag, mask }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }
}

impl StdEventConverter for BcidTagConverter {
    fn converting(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError> {
        let Ok(block) = src.get_block(0) else {
            spdlog::trace!("{}: event {} has no BCID block", self.tag, src.event_n());
            return Ok(());
        };
        if block.len() < 4 {
            return Err(ConvertError::Decode {
                converter: "BcidTagConverter",
                block: 0,
                reason: format!("{} bytes is too short for a BCID word", block.len()),
            });
        }
        let bcid = LittleEndian::read_u32(&block[..4]) & self.mask;
        dst.set_tag(self.tag, bcid);
        Ok(())
    }
}
