//! The converters shipped with the library.
pub mod bcid;
pub mod ex0;
pub mod status;
pub mod tlu;

use super::constants::*;
use super::converter::ConverterRegistry;
use super::error::RegistryError;

/// Install every built-in converter.
pub fn register_builtin_converters(registry: &mut ConverterRegistry) -> Result<(), RegistryError> {
    registry.register(ex0::EX0_RAW, |conf| Box::new(ex0::Ex0RawConverter::new(conf)))?;
    registry.register(DSP_TLU, |_| Box::new(tlu::TluRawConverter))?;
    registry.register(status::STATUS_EVENT, |_| Box::new(status::StatusConverter))?;
    for (description, tag) in [
        (DSP_ABC_DUT, TAG_DUT_BCID),
        (DSP_ABC_TIMING, TAG_TIMING_BCID),
        (DSP_TTC_DUT, TAG_DUT_DAQ_BCID),
        (DSP_TTC_TIMING, TAG_TIMING_DAQ_BCID),
    ] {
        registry.register(description, move |conf| {
            Box::new(bcid::BcidTagConverter::new(tag, conf))
        })?;
    }
    Ok(())
}

/// A registry holding only the built-in converters.
pub fn builtin_registry() -> Result<ConverterRegistry, RegistryError> {
    let mut registry = ConverterRegistry::new("StdEventConverter");
    register_builtin_converters(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::str2hash;

    #[test]
    fn test_builtins_registered() {
        let reg = builtin_registry().unwrap();
        assert_eq!(reg.len(), 7);
        for name in [DSP_TLU, DSP_ABC_DUT, DSP_TTC_TIMING, "Ex0Raw", "StatusEvent"] {
            assert!(reg.contains(str2hash(name)), "{name} missing");
        }
        let mut again = builtin_registry().unwrap();
        assert!(register_builtin_converters(&mut again).is_err());
    }
}
