use crate::converter::StdEventConverter;
use crate::error::ConvertError;
use crate::event::Event;
use crate::standard_event::StandardEvent;

/// The trigger unit contributes no planes, only the trigger number and time of the cycle.
#[derive(Debug, Clone, Copy)]
pub struct TluRawConverter;

impl StdEventConverter for TluRawConverter {
    fn converting(&self, src: &Event, dst: &mut StandardEvent) -> Result<(), ConvertError> {
        if !dst.is_flag_trigger() {
            dst.set_trigger_n(src.trigger_n());
        }
        if src.is_flag_timestamp() && !dst.is_flag_timestamp() {
            dst.set_timestamp(src.timestamp_begin(), src.timestamp_end());
        }
        dst.set_tag("TLU.TRIGGER", src.trigger_n());
        Ok(())
    }
}
