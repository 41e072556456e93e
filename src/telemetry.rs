//! Scaled integer register map for the supervisory link.
//!
//! The core works in physical units only. This module converts between
//! those and the fixed-point registers seen by downstream consumers.
//! Float to register conversion saturates at the register width.

use crate::{
    error::RegisterError,
    model::Measurements,
    protection::FaultSet,
    sequencer::{OperationMode, State},
};

const STATUS_PLL_LOCKED: u16 = 0x0100;
const STATUS_GRID_CONNECTED: u16 = 0x0200;
const STATUS_BMS_VALID: u16 = 0x0400;

const CONTROL_ENABLE: u16 = 0x0001;
const CONTROL_FAULT_RESET: u16 = 0x0002;
const CONTROL_GRID_CONNECT: u16 = 0x0004;

/// Physical-unit view of the system published as input registers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub state: State,
    pub pll_locked: bool,
    pub grid_connected: bool,
    pub bms_valid: bool,
    pub faults: FaultSet,
    pub measurements: Measurements,
    /// Efficiency in %.
    pub efficiency: f32,
    /// Pack state of charge in %.
    pub soc: f32,
}

/// Read-only registers, in address order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputRegisters {
    pub status_word: u16,
    pub fault_code_low: u16,
    pub fault_code_high: u16,
    /// 10 mV
    pub vdc: i16,
    /// 10 mA
    pub idc: i16,
    /// 100 W
    pub pdc: i16,
    /// Vab, 10 mV
    pub vac: i16,
    /// Ia, 10 mA
    pub iac: i16,
    pub pac: i16,
    /// 100 VAr
    pub qac: i16,
    /// 10 mHz
    pub frequency: u16,
    /// 0.001
    pub pf: u16,
    /// 0.1 °C
    pub temp_heatsink: i16,
    pub temp_mosfet: i16,
    /// 0.01 %
    pub efficiency: u16,
    pub soc: u16,
}

impl InputRegisters {
    pub const LEN: u16 = 16;

    pub fn encode(s: &Snapshot) -> Self {
        let m = &s.measurements;
        let mut status_word = s.state as u16;
        if s.pll_locked {
            status_word |= STATUS_PLL_LOCKED;
        }
        if s.grid_connected {
            status_word |= STATUS_GRID_CONNECTED;
        }
        if s.bms_valid {
            status_word |= STATUS_BMS_VALID;
        }
        let faults = s.faults.bits();

        Self {
            status_word,
            fault_code_low: (faults & 0xffff) as u16,
            fault_code_high: (faults >> 16) as u16,
            vdc: (m.dc.vdc * 100.) as i16,
            idc: (m.dc.idc * 100.) as i16,
            pdc: (m.dc.pdc / 100.) as i16,
            vac: (m.ac.v_ll[0] * 100.) as i16,
            iac: (m.ac.i.a * 100.) as i16,
            pac: (m.ac.p / 100.) as i16,
            qac: (m.ac.q / 100.) as i16,
            frequency: (m.ac.frequency * 100.) as u16,
            pf: (m.ac.pf * 1000.) as u16,
            temp_heatsink: (m.temps.heatsink * 10.) as i16,
            temp_mosfet: (m.temps.max() * 10.) as i16,
            efficiency: (s.efficiency * 100.) as u16,
            soc: (s.soc * 100.) as u16,
        }
    }

    /// Raw register value, signed registers in two's complement.
    pub fn read(&self, address: u16) -> Result<u16, RegisterError> {
        Ok(match address {
            0 => self.status_word,
            1 => self.fault_code_low,
            2 => self.fault_code_high,
            3 => self.vdc as u16,
            4 => self.idc as u16,
            5 => self.pdc as u16,
            6 => self.vac as u16,
            7 => self.iac as u16,
            8 => self.pac as u16,
            9 => self.qac as u16,
            10 => self.frequency,
            11 => self.pf,
            12 => self.temp_heatsink as u16,
            13 => self.temp_mosfet as u16,
            14 => self.efficiency,
            15 => self.soc,
            _ => return Err(RegisterError::IllegalAddress(address)),
        })
    }
}

/// Operator commands in physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Commands {
    pub enable: bool,
    /// Request clearing of every clearable fault.
    pub fault_reset: bool,
    /// Grid contactor may be closed.
    pub grid_connect: bool,
    pub mode: OperationMode,
    /// Active power in W.
    pub p_ref: f32,
    /// Reactive power in VAr.
    pub q_ref: f32,
    pub pf_ref: f32,
    /// DC voltage target in V.
    pub vdc_ref: f32,
}

/// Read/write registers, in address order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HoldingRegisters {
    pub control_word: u16,
    pub mode_select: u16,
    /// 100 W
    pub p_ref: i16,
    /// 100 VAr
    pub q_ref: i16,
    /// 0.001
    pub pf_ref: i16,
    /// 1 V
    pub vdc_ref: u16,
}

impl HoldingRegisters {
    pub const LEN: u16 = 6;

    pub fn write(&mut self, address: u16, value: u16) -> Result<(), RegisterError> {
        let illegal = RegisterError::IllegalValue { address, value };
        match address {
            0 if value & !(CONTROL_ENABLE | CONTROL_FAULT_RESET | CONTROL_GRID_CONNECT) != 0 => {
                return Err(illegal)
            }
            0 => self.control_word = value,
            1 if value > OperationMode::VfControl as u16 => return Err(illegal),
            1 => self.mode_select = value,
            2 => self.p_ref = value as i16,
            3 => self.q_ref = value as i16,
            4 if (value as i16).unsigned_abs() > 1000 => return Err(illegal),
            4 => self.pf_ref = value as i16,
            5 => self.vdc_ref = value,
            _ => return Err(RegisterError::IllegalAddress(address)),
        }
        Ok(())
    }

    pub fn read(&self, address: u16) -> Result<u16, RegisterError> {
        Ok(match address {
            0 => self.control_word,
            1 => self.mode_select,
            2 => self.p_ref as u16,
            3 => self.q_ref as u16,
            4 => self.pf_ref as u16,
            5 => self.vdc_ref,
            _ => return Err(RegisterError::IllegalAddress(address)),
        })
    }

    pub fn decode(&self) -> Commands {
        Commands {
            enable: self.control_word & CONTROL_ENABLE != 0,
            fault_reset: self.control_word & CONTROL_FAULT_RESET != 0,
            grid_connect: self.control_word & CONTROL_GRID_CONNECT != 0,
            mode: OperationMode::from_bits(self.mode_select),
            p_ref: f32::from(self.p_ref) * 100.,
            q_ref: f32::from(self.q_ref) * 100.,
            pf_ref: f32::from(self.pf_ref) / 1000.,
            vdc_ref: f32::from(self.vdc_ref),
        }
    }

    /// Registers matching `c`, saturating out-of-range values.
    pub fn encode(c: &Commands) -> Self {
        let mut control_word = 0;
        for (set, bit) in [
            (c.enable, CONTROL_ENABLE),
            (c.fault_reset, CONTROL_FAULT_RESET),
            (c.grid_connect, CONTROL_GRID_CONNECT),
        ] {
            if set {
                control_word |= bit;
            }
        }
        Self {
            control_word,
            mode_select: c.mode as u16,
            p_ref: (c.p_ref / 100.) as i16,
            q_ref: (c.q_ref / 100.) as i16,
            pf_ref: (c.pf_ref * 1000.) as i16,
            vdc_ref: c.vdc_ref as u16,
        }
    }
}
