//! Device registration and LSS resolution.
//!
//! Devices register once and receive a stable [`DeviceId`], an index into a
//! fixed-capacity arena. A mapping never changes or disappears for the
//! engine's lifetime. Several devices may share one LSS; each claims one of
//! the 4 shared slots and the LSS's effective level is the minimum (weakest,
//! most-active) of all occupied slots.

use alloc::vec::Vec;

use super::regs::{lss_bank, lss_position, MAX_LSS};
use super::{PmuError, PowerLevel};

/// Arena capacity. The SoC exposes well under 256 power-gateable functions;
/// hitting this limit means the platform device list is corrupt.
pub const DEVICE_CAPACITY: usize = 256;

/// Shared slots per LSS.
pub const MAX_SHARED: usize = 4;

/// Reserved LSS for the display controller.
pub const LSS_DISPLAY: u8 = 22;
/// Reserved LSS for the imaging/ISP block.
pub const LSS_ISP: u8 = 24;

/// PCI class of display controllers.
pub const CLASS_DISPLAY: u8 = 0x03;
/// PCI class of multimedia devices; with [`SUBCLASS_IMAGING`] this is the
/// ISP.
pub const CLASS_MULTIMEDIA: u8 = 0x04;
pub const SUBCLASS_IMAGING: u8 = 0x80;

/// What a collaborator hands us at registration time. Identity for
/// idempotent re-registration is the whole descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDesc {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8,
    /// Vendor-defined capability byte carrying the LSS assignment for
    /// generic devices.
    pub lss_cap: u8,
}

/// Stable handle assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeviceId(pub u16);

/// A resolved device-to-subsystem mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLss {
    pub lss: u8,
    pub bank: u8,
    pub word: usize,
    pub bit: u32,
}

#[derive(Debug, Clone, Copy)]
struct SharedSlot {
    id: DeviceId,
    level: PowerLevel,
}

#[derive(Debug, Clone, Copy)]
struct DeviceRecord {
    desc: DeviceDesc,
    lss: u8,
    /// Index of the shared slot this device owns within its LSS.
    slot: u8,
}

/// Insert-only device arena plus the per-LSS shared slots.
pub struct DeviceTable {
    records: Vec<DeviceRecord>,
    slots: [[Option<SharedSlot>; MAX_SHARED]; 64],
}

impl DeviceTable {
    pub fn new() -> Self {
        Self {
            records: Vec::with_capacity(DEVICE_CAPACITY),
            slots: [[None; MAX_SHARED]; 64],
        }
    }

    /// Classify a descriptor into its LSS. Display and imaging map to
    /// reserved indices; everything else carries its LSS in the vendor
    /// capability byte.
    fn classify(desc: &DeviceDesc) -> u8 {
        if desc.class == CLASS_DISPLAY {
            LSS_DISPLAY
        } else if desc.class == CLASS_MULTIMEDIA && desc.subclass == SUBCLASS_IMAGING {
            LSS_ISP
        } else {
            desc.lss_cap
        }
    }

    /// Register a device, or return its existing id. Claims a shared slot
    /// on first registration; the slot starts at D0i0 (full power).
    pub fn register(&mut self, desc: DeviceDesc) -> Result<DeviceId, PmuError> {
        if let Some(i) = self.records.iter().position(|r| r.desc == desc) {
            return Ok(DeviceId(i as u16));
        }
        if self.records.len() >= DEVICE_CAPACITY {
            return Err(PmuError::TableFull);
        }

        let lss = Self::classify(&desc);
        if lss > MAX_LSS {
            return Err(PmuError::BankOverflow);
        }

        let slot = self.slots[lss as usize]
            .iter()
            .position(|s| s.is_none())
            .ok_or(PmuError::TooManySharers)?;

        let id = DeviceId(self.records.len() as u16);
        self.slots[lss as usize][slot] = Some(SharedSlot {
            id,
            level: PowerLevel::D0i0,
        });
        self.records.push(DeviceRecord {
            desc,
            lss,
            slot: slot as u8,
        });
        Ok(id)
    }

    pub fn resolve(&self, id: DeviceId) -> Result<ResolvedLss, PmuError> {
        let record = self
            .records
            .get(id.0 as usize)
            .ok_or(PmuError::NotFound)?;
        let (word, bit) = lss_position(record.lss);
        Ok(ResolvedLss {
            lss: record.lss,
            bank: lss_bank(record.lss),
            word,
            bit,
        })
    }

    /// Store a device's requested level and fold the LSS's effective level.
    pub fn set_request(
        &mut self,
        id: DeviceId,
        level: PowerLevel,
    ) -> Result<(u8, PowerLevel), PmuError> {
        let record = *self
            .records
            .get(id.0 as usize)
            .ok_or(PmuError::NotFound)?;
        let slots = &mut self.slots[record.lss as usize];
        match &mut slots[record.slot as usize] {
            Some(slot) => slot.level = level,
            None => return Err(PmuError::NotFound),
        }
        let effective = Self::fold(slots);
        Ok((record.lss, effective))
    }

    fn fold(slots: &[Option<SharedSlot>; MAX_SHARED]) -> PowerLevel {
        slots
            .iter()
            .flatten()
            .map(|s| s.level)
            .min()
            .unwrap_or(PowerLevel::D0i0)
    }

    /// Effective (min over sharers) level of one LSS; `None` if no device
    /// claimed it.
    pub fn effective_level(&self, lss: u8) -> Option<PowerLevel> {
        if lss > MAX_LSS {
            return None;
        }
        let slots = &self.slots[lss as usize];
        if slots.iter().all(|s| s.is_none()) {
            return None;
        }
        Some(Self::fold(slots))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(tag: u16, lss: u8) -> DeviceDesc {
        DeviceDesc {
            vendor_id: 0x8086,
            device_id: tag,
            class: 0x0C,
            subclass: 0x00,
            lss_cap: lss,
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let mut table = DeviceTable::new();
        let desc = generic(1, 3);
        let a = table.register(desc).unwrap();
        let b = table.register(desc).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn display_and_imaging_use_reserved_indices() {
        let mut table = DeviceTable::new();
        let display = DeviceDesc {
            vendor_id: 0x8086,
            device_id: 2,
            class: CLASS_DISPLAY,
            subclass: 0,
            lss_cap: 0,
        };
        let isp = DeviceDesc {
            vendor_id: 0x8086,
            device_id: 3,
            class: CLASS_MULTIMEDIA,
            subclass: SUBCLASS_IMAGING,
            lss_cap: 0,
        };
        let d = table.register(display).unwrap();
        let i = table.register(isp).unwrap();
        assert_eq!(table.resolve(d).unwrap().lss, LSS_DISPLAY);
        assert_eq!(table.resolve(i).unwrap().lss, LSS_ISP);
    }

    #[test]
    fn resolve_reports_word_bit_bank() {
        let mut table = DeviceTable::new();
        let id = table.register(generic(1, 37)).unwrap();
        let r = table.resolve(id).unwrap();
        assert_eq!(r.lss, 37);
        assert_eq!(r.word, 2);
        assert_eq!(r.bit, 10);
        assert_eq!(r.bank, 2);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let table = DeviceTable::new();
        assert_eq!(table.resolve(DeviceId(7)), Err(PmuError::NotFound));
    }

    #[test]
    fn weakest_level_wins_among_sharers() {
        let mut table = DeviceTable::new();
        let d1 = table.register(generic(1, 7)).unwrap();
        let d2 = table.register(generic(2, 7)).unwrap();

        let (_, eff) = table.set_request(d2, PowerLevel::D0i3).unwrap();
        // d1 still requests D0i0, so the LSS stays fully on.
        assert_eq!(eff, PowerLevel::D0i0);

        let (_, eff) = table.set_request(d1, PowerLevel::D0i2).unwrap();
        assert_eq!(eff, PowerLevel::D0i2);

        let (_, eff) = table.set_request(d1, PowerLevel::D0i3).unwrap();
        assert_eq!(eff, PowerLevel::D0i3);
        assert_eq!(table.effective_level(7), Some(PowerLevel::D0i3));
    }

    #[test]
    fn fifth_sharer_is_a_logic_error() {
        let mut table = DeviceTable::new();
        for tag in 0..4 {
            table.register(generic(tag, 9)).unwrap();
        }
        assert_eq!(table.register(generic(4, 9)), Err(PmuError::TooManySharers));
    }

    #[test]
    fn capacity_boundary() {
        let mut table = DeviceTable::new();
        // 64 LSS x 4 slots = 256 distinct registrations fit exactly.
        for lss in 0..64u8 {
            for n in 0..4u16 {
                table.register(generic(lss as u16 * 4 + n, lss)).unwrap();
            }
        }
        assert_eq!(table.len(), DEVICE_CAPACITY);
        // One more cannot wrap into another entry.
        let extra = DeviceDesc {
            vendor_id: 0x1234,
            device_id: 0xFFFF,
            class: 0x0C,
            subclass: 0,
            lss_cap: 1,
        };
        assert_eq!(table.register(extra), Err(PmuError::TableFull));
    }

    #[test]
    fn bank_overflow_is_rejected() {
        let mut table = DeviceTable::new();
        assert_eq!(table.register(generic(1, 64)), Err(PmuError::BankOverflow));
    }

    #[test]
    fn ids_are_unique_up_to_capacity() {
        let mut table = DeviceTable::new();
        let mut ids = std::vec::Vec::new();
        for lss in 0..64u8 {
            for n in 0..4u16 {
                ids.push(table.register(generic(lss as u16 * 4 + n, lss)).unwrap());
            }
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), DEVICE_CAPACITY);
    }
}
