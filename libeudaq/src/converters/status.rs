use crate::converter::StdEventConverter;
use crate::error::ConvertError;
use crate::event::Event;
use crate::standard_event::StandardEvent;

pub const STATUS_EVENT: &str = "StatusEvent";

/// Status events only carry tags for run control. They never convert.
#[derive(Debug, Clone, Copy)]
pub struct StatusConverter;

impl StdEventConverter for StatusConverter {
    fn converting(&self, _src: &Event, _dst: &mut StandardEvent) -> Result<(), ConvertError> {
        Err(ConvertError::Skipped(STATUS_EVENT))
    }
}
