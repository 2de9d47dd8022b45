/*!
    object dictionary of the drive

    each object is described by a constant of type [Object], a typed pointer to its index and subindex. The value type gives the width and signedness the drive uses for it.

    the controlword and statusword are bitfields following the CiA-402 device profile, their combination is the only way to drive the device state machine.
*/

use core::{fmt, marker::PhantomData};
use bilge::prelude::*;
use crate::{value_int, value_bilge};


/// position of a parameter in the object dictionary
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub index: u16,
    pub sub: u8,
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06x}/{}", self.index, self.sub)
    }
}

/**
    an object is a typed address in the object dictionary

    it only holds the address, hence can be created, copied or destroyed at no cost
*/
#[derive(PartialEq, Eq, Hash)]
pub struct Object<T> {
    address: Address,
    ty: PhantomData<T>,
}
impl<T> Object<T> {
    pub const fn new(index: u16, sub: u8) -> Self {
        Self {address: Address {index, sub}, ty: PhantomData}
    }
    pub const fn address(&self) -> Address {self.address}
}
impl<T: Value> Object<T> {
    pub const fn width(&self) -> Width {T::WIDTH}
}
// implemented manually to not require T: Clone
impl<T> Clone for Object<T> {
    fn clone(&self) -> Self {*self}
}
impl<T> Copy for Object<T> {}
impl<T> fmt::Debug for Object<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Object({})", self.address)
    }
}


/// number of bytes of a dictionary value
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    Byte = 1,
    Word = 2,
    Long = 4,
}
impl Width {
    pub const fn bytes(self) -> usize {self as usize}
    /// mask of the bits significant for this width
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xff,
            Self::Word => 0xffff,
            Self::Long => 0xffff_ffff,
        }
    }
    /// true if `raw` is the zero or sign extension of a value of this width
    pub const fn fits(self, raw: u32) -> bool {
        let high = raw & !self.mask();
        high == 0 || high == !self.mask()
    }
}

/**
    value that can be stored in a dictionary object

    values are exchanged with the drive as 32 bit little endian integers, only the lower [Self::WIDTH] bytes being significant
*/
pub trait Value: Copy {
    const WIDTH: Width;
    /// truncate a raw value to this type
    fn from_raw(raw: u32) -> Self;
    /// sign or zero extend this value to the raw form
    fn to_raw(self) -> u32;
}
value_int!(
    u8 => Width::Byte,
    i8 => Width::Byte,
    u16 => Width::Word,
    i16 => Width::Word,
    u32 => Width::Long,
    i32 => Width::Long,
    );


/// bitfield error register, any bit set means an error is pending
pub const ERROR_REGISTER: Object<u8> = Object::new(0x1001, 0x00);
/// code of the last error, zero if none
pub const ERROR_CODE: Object<u16> = Object::new(0x603f, 0x00);
/// power supply voltage, in 0.1 V
pub const SUPPLY_VOLTAGE: Object<u16> = Object::new(0x2200, 0x01);
/// output current limit, that is the peak current, in mA
pub const CURRENT_LIMIT: Object<u32> = Object::new(0x3001, 0x02);
/// current threshold detecting the hard stop during homing, in mA
pub const HOMING_CURRENT_THRESHOLD: Object<u16> = Object::new(0x30b2, 0x00);
/// averaged motor current, in mA
pub const CURRENT_AVERAGED: Object<i32> = Object::new(0x30d1, 0x01);
/// instantaneous motor current, in mA
pub const CURRENT_ACTUAL: Object<i32> = Object::new(0x30d1, 0x02);
/// power stage temperature, in 0.1 °C
pub const TEMPERATURE: Object<i16> = Object::new(0x3201, 0x01);
pub const CONTROLWORD: Object<Controlword> = Object::new(0x6040, 0x00);
pub const STATUSWORD: Object<Statusword> = Object::new(0x6041, 0x00);
/// requested operation mode, see [OperationMode]
pub const MODES_OF_OPERATION: Object<i8> = Object::new(0x6060, 0x00);
/// operation mode currently applied by the drive
pub const MODES_OF_OPERATION_DISPLAY: Object<i8> = Object::new(0x6061, 0x00);
/// in encoder increments
pub const POSITION_ACTUAL: Object<i32> = Object::new(0x6064, 0x00);
/// in rpm
pub const VELOCITY_DEMAND: Object<i32> = Object::new(0x606b, 0x00);
/// in rpm
pub const VELOCITY_ACTUAL: Object<i32> = Object::new(0x606c, 0x00);
/// in encoder increments
pub const TARGET_POSITION: Object<i32> = Object::new(0x607a, 0x00);
/// cruise velocity of position profiles, in rpm
pub const PROFILE_VELOCITY: Object<u32> = Object::new(0x6081, 0x00);
/// in rpm/s
pub const PROFILE_ACCELERATION: Object<u32> = Object::new(0x6083, 0x00);
/// in rpm/s
pub const PROFILE_DECELERATION: Object<u32> = Object::new(0x6084, 0x00);
/// 0 for linear ramps, 1 for sin² ramps
pub const MOTION_PROFILE_TYPE: Object<i16> = Object::new(0x6086, 0x00);
pub const HOMING_METHOD: Object<i8> = Object::new(0x6098, 0x00);
/// speed while searching the switch or hard stop, in rpm
pub const HOMING_SPEED_SWITCH: Object<u32> = Object::new(0x6099, 0x01);
/// speed while searching the index pulse, in rpm
pub const HOMING_SPEED_ZERO: Object<u32> = Object::new(0x6099, 0x02);
/// in rpm/s
pub const HOMING_ACCELERATION: Object<u32> = Object::new(0x609a, 0x00);
/// in rpm
pub const TARGET_VELOCITY: Object<i32> = Object::new(0x60ff, 0x00);


/// CiA-402 controlword
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Controlword {
    pub switch_on: bool,
    pub enable_voltage: bool,
    /// active low
    pub quick_stop: bool,
    pub enable_operation: bool,
    /// rising edge triggers a new setpoint in position profile mode, or starts homing in homing mode
    pub start: bool,
    /// in position profile, abort the current motion for the new setpoint rather than chaining it
    pub immediately: bool,
    /// in position profile, the target position is relative
    pub relative: bool,
    /// rising edge resets a fault
    pub fault_reset: bool,
    pub halt: bool,
    pub change_on_setpoint: bool,
    pub manufacturer: u6,
}
value_bilge!(Controlword, u16);

/// CiA-402 statusword
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct Statusword {
    pub ready_to_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    /// active low
    pub quick_stop: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    pub manufacturer: bool,
    pub remote: bool,
    pub target_reached: bool,
    pub internal_limit: bool,
    /// setpoint acknowledge in position profile, homing attained in homing mode
    pub acknowledge: bool,
    /// following error in position profile, homing error in homing mode
    pub error: bool,
    pub unused: bool,
    /// position referenced to the home position
    pub referenced: bool,
}
value_bilge!(Statusword, u16);

impl Statusword {
    pub fn state(&self) -> Option<DeviceState> {
        DeviceState::decode(*self)
    }
    pub fn homing_attained(&self) -> bool {self.acknowledge()}
    pub fn homing_error(&self) -> bool {self.error()}
    pub fn setpoint_acknowledge(&self) -> bool {self.acknowledge()}
}


/// CiA-402 device state, as decoded from the statusword
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
}
impl DeviceState {
    /// decode the state bits of a statusword, `None` if they match no state
    pub fn decode(status: Statusword) -> Option<Self> {
        let raw = u16::from(status);
        match (raw & 0x4f, raw & 0x6f) {
            (0x00, _) => Some(Self::NotReadyToSwitchOn),
            (0x40, _) => Some(Self::SwitchOnDisabled),
            (_, 0x21) => Some(Self::ReadyToSwitchOn),
            (_, 0x23) => Some(Self::SwitchedOn),
            (_, 0x27) => Some(Self::OperationEnabled),
            (_, 0x07) => Some(Self::QuickStopActive),
            (0x0f, _) => Some(Self::FaultReactionActive),
            (0x08, _) => Some(Self::Fault),
            _ => None,
        }
    }
    pub fn is_fault(self) -> bool {
        matches!(self, Self::Fault | Self::FaultReactionActive)
    }
}

/// device control commands, each one only touching the bits it owns in the controlword
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Shutdown,
    SwitchOn,
    SwitchOnAndEnable,
    DisableVoltage,
    QuickStop,
    DisableOperation,
    EnableOperation,
    /// clear the fault reset bit, so that [Self::FaultReset] makes a rising edge
    FaultResetLow,
    FaultReset,
}
impl Command {
    /// bits changed by the command and their value
    pub const fn pattern(self) -> (u16, u16) {
        match self {
            Self::Shutdown =>           (0x0087, 0x0006),
            Self::SwitchOn =>           (0x0087, 0x0007),
            Self::SwitchOnAndEnable =>  (0x008f, 0x000f),
            Self::DisableVoltage =>     (0x0082, 0x0000),
            Self::QuickStop =>          (0x0086, 0x0002),
            Self::DisableOperation =>   (0x008f, 0x0007),
            Self::EnableOperation =>    (0x008f, 0x000f),
            Self::FaultResetLow =>      (0x0080, 0x0000),
            Self::FaultReset =>         (0x0080, 0x0080),
        }
    }
    /// apply the command to the given controlword, leaving other bits untouched
    pub fn apply(self, control: Controlword) -> Controlword {
        let (mask, value) = self.pattern();
        Controlword::from((u16::from(control) & !mask) | (value & mask))
    }
}

/// operation modes supported by this driver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i8)]
pub enum OperationMode {
    ProfilePosition = 1,
    ProfileVelocity = 3,
    Homing = 6,
}
impl OperationMode {
    pub const fn code(self) -> i8 {self as i8}
}
impl TryFrom<i8> for OperationMode {
    type Error = i8;
    fn try_from(code: i8) -> Result<Self, i8> {
        match code {
            1 => Ok(Self::ProfilePosition),
            3 => Ok(Self::ProfileVelocity),
            6 => Ok(Self::Homing),
            _ => Err(code),
        }
    }
}


/// error code embedded in a drive answer, when the drive refused an access
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct AbortCode(pub u32);

impl AbortCode {
    pub const NONE: Self = Self(0);
    pub const TOGGLE: Self = Self(0x0503_0000);
    pub const PROTOCOL_TIMEOUT: Self = Self(0x0504_0000);
    pub const UNKNOWN_COMMAND: Self = Self(0x0504_0001);
    pub const OUT_OF_MEMORY: Self = Self(0x0504_0005);
    pub const UNSUPPORTED_ACCESS: Self = Self(0x0601_0000);
    pub const WRITE_ONLY: Self = Self(0x0601_0001);
    pub const READ_ONLY: Self = Self(0x0601_0002);
    pub const NO_OBJECT: Self = Self(0x0602_0000);
    pub const NOT_MAPPABLE: Self = Self(0x0604_0041);
    pub const MAPPING_LENGTH: Self = Self(0x0604_0042);
    pub const INCOMPATIBLE: Self = Self(0x0604_0043);
    pub const HARDWARE: Self = Self(0x0606_0000);
    pub const LENGTH_MISMATCH: Self = Self(0x0607_0010);
    pub const LENGTH_TOO_HIGH: Self = Self(0x0607_0012);
    pub const LENGTH_TOO_LOW: Self = Self(0x0607_0013);
    pub const NO_SUBINDEX: Self = Self(0x0609_0011);
    pub const VALUE_RANGE: Self = Self(0x0609_0030);
    pub const VALUE_TOO_HIGH: Self = Self(0x0609_0031);
    pub const VALUE_TOO_LOW: Self = Self(0x0609_0032);
    pub const MAX_BELOW_MIN: Self = Self(0x0609_0036);
    pub const GENERAL: Self = Self(0x0800_0000);
    pub const TRANSFER: Self = Self(0x0800_0020);
    pub const LOCAL_CONTROL: Self = Self(0x0800_0021);
    pub const DEVICE_STATE: Self = Self(0x0800_0022);
    pub const PASSWORD: Self = Self(0x0f00_ffbe);
    pub const ILLEGAL_COMMAND: Self = Self(0x0f00_ffbf);
    pub const NMT_STATE: Self = Self(0x0f00_ffc0);

    pub fn description(self) -> &'static str {
        match self {
            Self::NONE => "no error",
            Self::TOGGLE => "toggle bit not alternated",
            Self::PROTOCOL_TIMEOUT => "protocol timed out",
            Self::UNKNOWN_COMMAND => "command specifier unknown",
            Self::OUT_OF_MEMORY => "out of memory",
            Self::UNSUPPORTED_ACCESS => "unsupported access to an object",
            Self::WRITE_ONLY => "attempt to read a write only object",
            Self::READ_ONLY => "attempt to write a read only object",
            Self::NO_OBJECT => "object does not exist",
            Self::NOT_MAPPABLE => "object cannot be mapped to a PDO",
            Self::MAPPING_LENGTH => "mapped objects exceed PDO length",
            Self::INCOMPATIBLE => "general parameter incompatibility",
            Self::HARDWARE => "access failed due to a hardware error",
            Self::LENGTH_MISMATCH => "data type length mismatch",
            Self::LENGTH_TOO_HIGH => "data type length too high",
            Self::LENGTH_TOO_LOW => "data type length too low",
            Self::NO_SUBINDEX => "subindex does not exist",
            Self::VALUE_RANGE => "value range exceeded",
            Self::VALUE_TOO_HIGH => "value too high",
            Self::VALUE_TOO_LOW => "value too low",
            Self::MAX_BELOW_MIN => "maximum value is less than minimum value",
            Self::GENERAL => "general error",
            Self::TRANSFER => "data cannot be transferred or stored",
            Self::LOCAL_CONTROL => "data cannot be transferred because of local control",
            Self::DEVICE_STATE => "data cannot be transferred in the present device state",
            Self::PASSWORD => "password incorrect",
            Self::ILLEGAL_COMMAND => "illegal command",
            Self::NMT_STATE => "device in wrong NMT state",
            _ => "unknown abort code",
        }
    }
}
impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x} ({})", self.0, self.description())
    }
}
impl fmt::Debug for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AbortCode({:#010x})", self.0)
    }
}
