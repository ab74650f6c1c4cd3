/*++

Licensed under the Apache-2.0 license.

File Name:

   translator.rs

Abstract:

    File contains the translator resolving dotted PFR keys into register values.

--*/

use sptool_error::SptoolError;
use sptool_image_gen::error;

use crate::area::{AreaKind, ConfigArea};
use crate::schema::PfrDatabase;
use crate::settings::PfrConfiguration;

fn unknown_key(key: &str) -> anyhow::Error {
    error(
        SptoolError::PFR_TRANSLATOR_UNKNOWN_KEY,
        format!("Unknown translator key `{key}`"),
    )
}

/// Resolves `CMPA.REG`, `CMPA.REG.FIELD`, `CFPA.…` and `UTIL.…` keys
#[derive(Debug)]
pub struct Translator<'a> {
    cmpa: ConfigArea<'a>,
    cfpa: ConfigArea<'a>,
}

impl<'a> Translator<'a> {
    /// Build both areas from their settings documents
    pub fn new(
        db: &'a PfrDatabase,
        cmpa: &PfrConfiguration,
        cfpa: &PfrConfiguration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            cmpa: ConfigArea::from_config(db, AreaKind::Cmpa, cmpa)?,
            cfpa: ConfigArea::from_config(db, AreaKind::Cfpa, cfpa)?,
        })
    }

    /// Value behind a dotted key
    pub fn translate(&self, key: &str) -> anyhow::Result<u64> {
        let (area, rest) = key.split_once('.').ok_or_else(|| unknown_key(key))?;
        let value = match area {
            "CMPA" => Self::register_value(&self.cmpa, key, rest)?,
            "CFPA" => Self::register_value(&self.cfpa, key, rest)?,
            "UTIL" => self.util_value(key, rest)?,
            _ => return Err(unknown_key(key)),
        };
        log::debug!("Translated {key} to {value:#x}");
        Ok(value)
    }

    fn register_value(area: &ConfigArea<'a>, key: &str, path: &str) -> anyhow::Result<u64> {
        let (reg_name, field_name) = match path.split_once('.') {
            Some((reg, field)) => (reg, Some(field)),
            None => (path, None),
        };
        let reg = area.register(reg_name)?;
        match field_name {
            Some(field) => Ok(reg.field_value(reg.field(field)?)),
            None => reg.int_value().ok_or_else(|| {
                error(
                    SptoolError::PFR_INVALID_VALUE,
                    format!("{key} is wider than 64 bits"),
                )
            }),
        }
    }

    fn util_value(&self, key: &str, name: &str) -> anyhow::Result<u64> {
        match name {
            "isUDSKeyCodeValid" => {
                let valid = self
                    .cfpa
                    .register("UDS_KEY_CODE")
                    .map(|reg| reg.value().iter().any(|byte| *byte != 0))
                    .unwrap_or(false);
                Ok(u64::from(valid))
            }
            _ => Err(unknown_key(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: &str, settings: &str) -> PfrConfiguration {
        PfrConfiguration::from_text(&format!(
            r#"{{"device": "lpc55s6x", "type": "{kind}", "settings": {settings}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_translate() {
        let db = PfrDatabase::load().unwrap();
        let cmpa = config(
            "CMPA",
            r#"{"BOOT_CFG": {"bitfields": {"DEFAULT_ISP_MODE": "UART_ISP"}}}"#,
        );
        let cfpa = config("CFPA", r#"{"UDS_KEY_CODE": {"value": "0x1"}}"#);
        let translator = Translator::new(&db, &cmpa, &cfpa).unwrap();

        assert_eq!(translator.translate("CMPA.BOOT_CFG").unwrap(), 0x20);
        assert_eq!(
            translator.translate("CMPA.BOOT_CFG.DEFAULT_ISP_MODE").unwrap(),
            2
        );
        assert_eq!(translator.translate("CFPA.VERSION").unwrap(), 0);
        assert_eq!(translator.translate("UTIL.isUDSKeyCodeValid").unwrap(), 1);

        for key in ["PFR.BOOT_CFG", "UTIL.other", "CMPA"] {
            let err = translator.translate(key).unwrap_err();
            assert_eq!(
                err.downcast_ref::<SptoolError>(),
                Some(&SptoolError::PFR_TRANSLATOR_UNKNOWN_KEY)
            );
        }
        let err = translator.translate("CMPA.ROTKH").unwrap_err();
        assert_eq!(
            err.downcast_ref::<SptoolError>(),
            Some(&SptoolError::PFR_INVALID_VALUE)
        );
    }

    #[test]
    fn test_uds_key_code_unset() {
        let db = PfrDatabase::load().unwrap();
        let cmpa = config("CMPA", r#"{"USB_ID": {"value": 1}}"#);
        let cfpa = config("CFPA", r#"{"VERSION": {"value": 2}}"#);
        let translator = Translator::new(&db, &cmpa, &cfpa).unwrap();
        assert_eq!(translator.translate("UTIL.isUDSKeyCodeValid").unwrap(), 0);
        assert_eq!(translator.translate("CFPA.VERSION").unwrap(), 2);
    }
}
