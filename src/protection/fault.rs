use core::{fmt, ops};

/// Fault kinds with their telemetry bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum Fault {
    DcOvervoltage = 0x0000_0001,
    DcUndervoltage = 0x0000_0002,
    DcOvercurrent = 0x0000_0004,
    DcGroundFault = 0x0000_0008,

    AcOvervoltage = 0x0000_0010,
    AcUndervoltage = 0x0000_0020,
    AcOvercurrent = 0x0000_0040,
    AcShortCircuit = 0x0000_0080,

    OverFrequency = 0x0000_0100,
    UnderFrequency = 0x0000_0200,
    AntiIslanding = 0x0000_0400,

    OvertempMosfet = 0x0000_1000,
    OvertempHeatsink = 0x0000_2000,
    OvertempInductor = 0x0000_4000,
    OvertempAmbient = 0x0000_8000,

    BmsTimeout = 0x0001_0000,
    ModbusError = 0x0002_0000,

    DesatDetected = 0x0010_0000,
    GateDriver = 0x0020_0000,
    NpImbalance = 0x0040_0000,
    PrechargeFail = 0x0080_0000,

    EstopActive = 0x0100_0000,
    Watchdog = 0x0200_0000,
    InternalError = 0x0400_0000,
}

impl Fault {
    /// Every fault in description priority order.
    pub const ALL: [Fault; 24] = [
        Fault::DcOvervoltage,
        Fault::DcUndervoltage,
        Fault::DcOvercurrent,
        Fault::AcOvervoltage,
        Fault::AcUndervoltage,
        Fault::AcOvercurrent,
        Fault::AcShortCircuit,
        Fault::OvertempMosfet,
        Fault::OvertempHeatsink,
        Fault::OverFrequency,
        Fault::UnderFrequency,
        Fault::AntiIslanding,
        Fault::BmsTimeout,
        Fault::DesatDetected,
        Fault::NpImbalance,
        Fault::PrechargeFail,
        Fault::EstopActive,
        Fault::InternalError,
        Fault::DcGroundFault,
        Fault::OvertempInductor,
        Fault::OvertempAmbient,
        Fault::ModbusError,
        Fault::GateDriver,
        Fault::Watchdog,
    ];

    pub const fn bit(self) -> u32 {
        self as u32
    }

    pub const fn label(self) -> &'static str {
        match self {
            Fault::DcOvervoltage => "DC Over-Voltage",
            Fault::DcUndervoltage => "DC Under-Voltage",
            Fault::DcOvercurrent => "DC Over-Current",
            Fault::DcGroundFault => "DC Ground Fault",
            Fault::AcOvervoltage => "AC Over-Voltage",
            Fault::AcUndervoltage => "AC Under-Voltage",
            Fault::AcOvercurrent => "AC Over-Current",
            Fault::AcShortCircuit => "Short Circuit",
            Fault::OverFrequency => "Over-Frequency",
            Fault::UnderFrequency => "Under-Frequency",
            Fault::AntiIslanding => "Anti-Islanding",
            Fault::OvertempMosfet => "MOSFET Over-Temp",
            Fault::OvertempHeatsink => "Heatsink Over-Temp",
            Fault::OvertempInductor => "Inductor Over-Temp",
            Fault::OvertempAmbient => "Ambient Over-Temp",
            Fault::BmsTimeout => "BMS Timeout",
            Fault::ModbusError => "Modbus Error",
            Fault::DesatDetected => "DESAT Detected",
            Fault::GateDriver => "Gate Driver Fault",
            Fault::NpImbalance => "NP Imbalance",
            Fault::PrechargeFail => "Pre-charge Fail",
            Fault::EstopActive => "E-Stop Active",
            Fault::Watchdog => "Watchdog Reset",
            Fault::InternalError => "Internal Error",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Set of faults, encoded as the telemetry bitmask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FaultSet(u32);

impl FaultSet {
    const MASK: u32 = {
        let mut mask = 0;
        let mut i = 0;
        while i < Fault::ALL.len() {
            mask |= Fault::ALL[i].bit();
            i += 1;
        }
        mask
    };

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(Self::MASK)
    }

    /// Drops bits that name no fault.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, fault: Fault) -> bool {
        self.0 & fault.bit() != 0
    }

    /// True if any fault of `other` is also in `self`.
    pub const fn intersects(self, other: FaultSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn raise(&mut self, fault: Fault) {
        self.0 |= fault.bit();
    }

    pub const fn union(self, other: FaultSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: FaultSet) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn intersection(self, other: FaultSet) -> Self {
        Self(self.0 & other.0)
    }

    /// Faults in description priority order.
    pub fn iter(self) -> impl Iterator<Item = Fault> {
        Fault::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<Fault> for FaultSet {
    fn from(fault: Fault) -> Self {
        Self(fault.bit())
    }
}

impl FromIterator<Fault> for FaultSet {
    fn from_iter<I: IntoIterator<Item = Fault>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, f| set | f)
    }
}

impl<T: Into<FaultSet>> ops::BitOr<T> for FaultSet {
    type Output = Self;

    fn bitor(self, rhs: T) -> Self {
        self.union(rhs.into())
    }
}

impl<T: Into<FaultSet>> ops::BitOrAssign<T> for FaultSet {
    fn bitor_assign(&mut self, rhs: T) {
        *self = self.union(rhs.into());
    }
}

impl ops::BitOr for Fault {
    type Output = FaultSet;

    fn bitor(self, rhs: Self) -> FaultSet {
        FaultSet::from(self) | rhs
    }
}

impl fmt::Debug for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Label of the highest priority fault, `"No Fault"` for an empty set.
pub fn describe(faults: FaultSet) -> &'static str {
    faults.iter().next().map_or("No Fault", Fault::label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_encoding() {
        let set = Fault::DcOvervoltage | Fault::EstopActive;
        assert_eq!(set.bits(), 0x0100_0001);
        assert_eq!(FaultSet::from_bits_truncate(0xffff_ffff).bits(), 0x07f3_f7ff);
        assert_eq!(FaultSet::from_bits_truncate(0x800).bits(), 0);
    }

    #[test]
    fn set_algebra() {
        let a = Fault::AcOvercurrent | Fault::NpImbalance;
        let b = Fault::NpImbalance | Fault::Watchdog;
        assert_eq!(a.intersection(b), FaultSet::from(Fault::NpImbalance));
        assert_eq!(a.difference(b), FaultSet::from(Fault::AcOvercurrent));
        assert_eq!(a.union(b).iter().count(), 3);
        assert!(a.intersects(b));
        assert!(!a.contains(Fault::Watchdog));

        let mut c = FaultSet::empty();
        c.raise(Fault::Watchdog);
        c.raise(Fault::Watchdog);
        assert_eq!(c, Fault::Watchdog.into());
    }

    #[test]
    fn description_priority() {
        assert_eq!(describe(FaultSet::empty()), "No Fault");
        assert_eq!(describe(Fault::InternalError | Fault::DcOvercurrent), "DC Over-Current");
        assert_eq!(describe(Fault::AcShortCircuit | Fault::AcOvercurrent), "AC Over-Current");
        assert_eq!(describe(Fault::OverFrequency | Fault::OvertempHeatsink), "Heatsink Over-Temp");
        assert_eq!(describe(Fault::Watchdog | Fault::InternalError), "Internal Error");
        assert_eq!(describe(Fault::Watchdog.into()), "Watchdog Reset");
    }

    #[test]
    fn every_bit_is_listed_once() {
        let all: FaultSet = Fault::ALL.into_iter().collect();
        assert_eq!(all.iter().count(), Fault::ALL.len());
        assert_eq!(all.bits().count_ones() as usize, Fault::ALL.len());
    }
}
