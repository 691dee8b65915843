//! Capability model
//!
//! A software rendition of the hardware capabilities the kernel hands out:
//! tagged, bounded references carrying a permission set and, once sealed, an
//! object type. A sealed capability is immutable and can only be turned back
//! into a usable reference by whoever holds an unsealer for its type.
//!
//! The kernel seals three kinds of objects (see [`ObjectType`]): activation
//! references, activation control references and synchronous-call tokens.

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Permissions d'une capability
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perms: u32 {
        const GLOBAL    = 1 << 0;
        const EXECUTE   = 1 << 1;
        const LOAD      = 1 << 2;
        const STORE     = 1 << 3;
        const LOAD_CAP  = 1 << 4;
        const STORE_CAP = 1 << 5;
        const SEAL      = 1 << 7;
        const CCALL     = 1 << 8;
        const UNSEAL    = 1 << 9;

        const DATA   = Self::LOAD.bits() | Self::STORE.bits();
        const SEALER = Self::SEAL.bits() | Self::UNSEAL.bits() | Self::GLOBAL.bits();
    }
}

/// Object type carried by a sealed capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectType(pub u64);

impl ObjectType {
    pub const ACT_REF: ObjectType = ObjectType(0x10);
    pub const ACT_CTRL_REF: ObjectType = ObjectType(0x11);
    pub const SYNC_TOKEN: ObjectType = ObjectType(0x12);

    /// Types the root sealer is able to seal.
    pub const KERNEL_RANGE: (u64, u64) = (0x10, 3);
}

/// Why a capability operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    Untagged,
    Sealed,
    NotSealed,
    PermitSealViolation,
    PermitUnsealViolation,
    TypeViolation { expected: ObjectType, found: ObjectType },
    LengthViolation,
    MonotonicityViolation,
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untagged => write!(f, "capability tag cleared"),
            Self::Sealed => write!(f, "capability is sealed"),
            Self::NotSealed => write!(f, "capability is not sealed"),
            Self::PermitSealViolation => write!(f, "sealer lacks SEAL permission"),
            Self::PermitUnsealViolation => write!(f, "unsealer lacks UNSEAL permission"),
            Self::TypeViolation { expected, found } => {
                write!(f, "object type mismatch: expected {:#x}, found {:#x}", expected.0, found.0)
            }
            Self::LengthViolation => write!(f, "cursor outside capability bounds"),
            Self::MonotonicityViolation => write!(f, "bounds or permissions may only shrink"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    tag: bool,
    base: u64,
    length: u64,
    offset: u64,
    perms: Perms,
    otype: Option<ObjectType>,
}

impl Capability {
    /// Fresh tagged, unsealed capability.
    pub const fn new(base: u64, length: u64, perms: Perms) -> Self {
        Self { tag: true, base, length, offset: 0, perms, otype: None }
    }

    /// The untagged null capability.
    pub const fn null() -> Self {
        Self { tag: false, base: 0, length: 0, offset: 0, perms: Perms::empty(), otype: None }
    }

    /// Sealer able to seal and unseal every kernel object type.
    pub const fn root_sealer() -> Self {
        Self::new(ObjectType::KERNEL_RANGE.0, ObjectType::KERNEL_RANGE.1, Perms::SEALER)
    }

    pub fn tag(&self) -> bool {
        self.tag
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn cursor(&self) -> u64 {
        self.base.wrapping_add(self.offset)
    }

    pub fn perms(&self) -> Perms {
        self.perms
    }

    pub fn otype(&self) -> Option<ObjectType> {
        self.otype
    }

    pub fn is_sealed(&self) -> bool {
        self.otype.is_some()
    }

    fn check_mutable(&self) -> Result<(), CapError> {
        if !self.tag {
            return Err(CapError::Untagged);
        }
        if self.is_sealed() {
            return Err(CapError::Sealed);
        }
        Ok(())
    }

    /// Move the cursor. Out-of-bounds cursors are representable.
    pub fn set_offset(self, offset: u64) -> Result<Self, CapError> {
        self.check_mutable()?;
        Ok(Self { offset, ..self })
    }

    /// Narrow to `[cursor, cursor + length)`.
    pub fn set_bounds(self, length: u64) -> Result<Self, CapError> {
        self.check_mutable()?;
        let new_base = self.cursor();
        let old_top = self.base as u128 + self.length as u128;
        if new_base < self.base || new_base as u128 + length as u128 > old_top {
            return Err(CapError::MonotonicityViolation);
        }
        Ok(Self { base: new_base, length, offset: 0, ..self })
    }

    /// Drop permissions. Never adds any.
    pub fn and_perms(self, keep: Perms) -> Result<Self, CapError> {
        self.check_mutable()?;
        Ok(Self { perms: self.perms & keep, ..self })
    }

    fn sealer_type(sealer: &Capability, needed: Perms) -> Result<ObjectType, CapError> {
        if !sealer.tag {
            return Err(CapError::Untagged);
        }
        if sealer.is_sealed() {
            return Err(CapError::Sealed);
        }
        if !sealer.perms.contains(needed) {
            return Err(if needed == Perms::SEAL {
                CapError::PermitSealViolation
            } else {
                CapError::PermitUnsealViolation
            });
        }
        if sealer.offset >= sealer.length {
            return Err(CapError::LengthViolation);
        }
        Ok(ObjectType(sealer.cursor()))
    }

    /// Seal with the type selected by `sealer`'s cursor.
    pub fn seal(self, sealer: &Capability) -> Result<Self, CapError> {
        self.check_mutable()?;
        let otype = Self::sealer_type(sealer, Perms::SEAL)?;
        Ok(Self { otype: Some(otype), ..self })
    }

    /// Unseal; the unsealer's cursor must name this capability's type.
    pub fn unseal(self, unsealer: &Capability) -> Result<Self, CapError> {
        if !self.tag {
            return Err(CapError::Untagged);
        }
        let found = self.otype.ok_or(CapError::NotSealed)?;
        let expected = Self::sealer_type(unsealer, Perms::UNSEAL)?;
        if found != expected {
            return Err(CapError::TypeViolation { expected, found });
        }
        Ok(Self { otype: None, ..self })
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cap[t:{} b:{:#x} l:{:#x} o:{:#x} p:{:#x}",
            self.tag as u8,
            self.base,
            self.length,
            self.offset,
            self.perms.bits()
        )?;
        match self.otype {
            Some(ty) => write!(f, " s:{:#x}]", ty.0),
            None => write!(f, "]"),
        }
    }
}

/// Sealers for the kernel's object types, derived once from the root sealer.
#[derive(Debug, Clone, Copy)]
pub struct KernelSealers {
    pub act_ref: Capability,
    pub act_ctrl_ref: Capability,
    pub sync_token: Capability,
}

impl KernelSealers {
    pub fn derive(root: Capability) -> Result<Self, CapError> {
        let pick = |ty: ObjectType| -> Result<Capability, CapError> {
            root.set_offset(ty.0.wrapping_sub(root.base()))?.set_bounds(1)
        };
        Ok(Self {
            act_ref: pick(ObjectType::ACT_REF)?,
            act_ctrl_ref: pick(ObjectType::ACT_CTRL_REF)?,
            sync_token: pick(ObjectType::SYNC_TOKEN)?,
        })
    }
}
