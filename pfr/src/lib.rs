/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Protected Flash Region library: CMPA and CFPA register files, their
    settings documents and the binary page codec.

--*/

mod area;
mod registers;
mod schema;
mod settings;
mod translator;

pub use area::{AreaKind, ConfigArea};
pub use registers::Register;
pub use schema::{
    pfr_reg_inverse_high_half, AreaSchema, BitFieldDef, ComputeHook, DeviceSchema, EnumDef,
    HookRegistry, PfrDatabase, RegisterDef, PFR_AREA_SIZE,
};
pub use settings::{PfrConfiguration, RegisterSetting};
pub use translator::Translator;

/// Marker word repeated over the seal registers
pub const SEAL_MARK: &[u8; 4] = b"SEAL";

/// Name of the register receiving the Root-Of-Trust Key Hash
pub const ROTKH_REGISTER: &str = "ROTKH";
