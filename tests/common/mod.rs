//! simulated drive answering the serial protocol, for tests without hardware
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    time::Duration,
    };
use embedded_hal::delay::DelayNs;
use eposlink::{
    frame::{self, opcode},
    objects::{self, Address, AbortCode, DeviceState, Object},
    transport::Transport,
    };


pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// what happens once a motion has been polled long enough
#[derive(Copy, Clone, Debug)]
pub enum Outcome {
    /// target reached, and homing attained in homing mode
    Reached,
    /// the drive enters fault state with this error code
    Fault(u16),
    /// the homing error bit rises
    HomingError,
    /// nothing ever happens
    Never,
}

/// delay only accounting the time it should have slept
#[derive(Clone, Debug, Default)]
pub struct Clock {
    pub elapsed: Duration,
}
impl DelayNs for Clock {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed += Duration::from_nanos(ns.into());
    }
}

/**
    drive implementing a CiA-402 state machine over an object store

    requests are processed as soon as they are written, the answer is then available for reading
*/
pub struct Drive {
    pub node: u8,
    pub state: DeviceState,
    pub objects: HashMap<Address, u32>,
    /// every write request received, refused or not
    pub writes: Vec<(Address, u32)>,
    /// number of statusword reads since the last motion started
    pub polls: usize,
    /// number of statusword polls before a motion ends
    pub motion_polls: usize,
    pub outcome: Outcome,
    /// accesses to these objects are refused with the given code
    pub refuse: HashMap<Address, AbortCode>,
    /// the drive never answers
    pub silent: bool,
    /// answers carry no data
    pub garbled: bool,
    /// controlword writes are accepted but the state never changes
    pub frozen: bool,
    /// the mode display never follows the requested mode
    pub mode_stuck: bool,
    /// written current limits are capped to this value
    pub current_cap: Option<u32>,
    /// total time spent waiting answers
    pub waited: Duration,

    moving: bool,
    reached: bool,
    acknowledge: bool,
    homing_error: bool,
    answer: VecDeque<u8>,
}

impl Drive {
    pub fn new() -> Self {
        let mut objects = HashMap::new();
        for (object, value) in [
            (objects::SUPPLY_VOLTAGE.address(), 240),
            (objects::CURRENT_LIMIT.address(), 1000),
            (objects::TEMPERATURE.address(), 315),
            (objects::POSITION_ACTUAL.address(), 0),
            (objects::VELOCITY_ACTUAL.address(), 0),
            (objects::CURRENT_AVERAGED.address(), 0),
            (objects::ERROR_REGISTER.address(), 0),
            (objects::ERROR_CODE.address(), 0),
            (objects::CONTROLWORD.address(), 0),
            (objects::MODES_OF_OPERATION.address(), 0),
            (objects::MODES_OF_OPERATION_DISPLAY.address(), 0),
        ] {
            objects.insert(object, value);
        }
        Self {
            node: 0,
            state: DeviceState::SwitchOnDisabled,
            objects,
            writes: Vec::new(),
            polls: 0,
            motion_polls: 3,
            outcome: Outcome::Reached,
            refuse: HashMap::new(),
            silent: false,
            garbled: false,
            frozen: false,
            mode_stuck: false,
            current_cap: None,
            waited: Duration::ZERO,
            moving: false,
            reached: false,
            acknowledge: false,
            homing_error: false,
            answer: VecDeque::new(),
        }
    }
    pub fn in_state(state: DeviceState) -> Self {
        let mut drive = Self::new();
        drive.state = state;
        drive
    }
    /// put the drive in fault with the given error code
    pub fn fault(&mut self, code: u16) {
        self.state = DeviceState::Fault;
        self.moving = false;
        self.objects.insert(objects::ERROR_CODE.address(), code.into());
        self.objects.insert(objects::ERROR_REGISTER.address(), 0x01);
    }
    pub fn value<T>(&self, object: Object<T>) -> Option<u32> {
        self.objects.get(&object.address()).copied()
    }
    /// write requests to the given object, in order
    pub fn writes_to<T>(&self, object: Object<T>) -> Vec<u32> {
        self.writes.iter()
            .filter(|(address, _)|  *address == object.address())
            .map(|(_, value)|  *value)
            .collect()
    }
    /// write log as (index, sub, value)
    pub fn log(&self) -> Vec<(u16, u8, u32)> {
        self.writes.iter()
            .map(|(address, value)|  (address.index, address.sub, *value))
            .collect()
    }

    fn statusword(&mut self) -> u32 {
        if self.moving {
            self.polls += 1;
            if self.polls >= self.motion_polls {
                self.moving = false;
                match self.outcome {
                    Outcome::Reached => {
                        self.reached = true;
                        if self.mode() == 6
                            {self.acknowledge = true}
                    },
                    Outcome::Fault(code) => self.fault(code),
                    Outcome::HomingError => self.homing_error = true,
                    Outcome::Never => self.moving = true,
                }
            }
        }
        let state = match self.state {
            DeviceState::NotReadyToSwitchOn => 0x00,
            DeviceState::SwitchOnDisabled => 0x40,
            DeviceState::ReadyToSwitchOn => 0x21,
            DeviceState::SwitchedOn => 0x23,
            DeviceState::OperationEnabled => 0x37,
            DeviceState::QuickStopActive => 0x17,
            DeviceState::FaultReactionActive => 0x1f,
            DeviceState::Fault => 0x08,
        };
        let mut status = state | 0x0200;
        if self.reached {status |= 0x0400}
        if self.acknowledge {status |= 0x1000}
        if self.homing_error {status |= 0x2000}
        status
    }
    fn mode(&self) -> u32 {
        self.value(objects::MODES_OF_OPERATION_DISPLAY).unwrap_or(0) & 0xff
    }
    fn start_motion(&mut self) {
        self.moving = true;
        self.reached = false;
        self.homing_error = false;
        self.polls = 0;
    }

    fn controlword(&mut self, control: u32) {
        let previous = self.value(objects::CONTROLWORD).unwrap_or(0);
        self.objects.insert(objects::CONTROLWORD.address(), control);
        if self.frozen
            {return}
        let rising = |bit: u32|  control & bit != 0 && previous & bit == 0;

        if self.state == DeviceState::Fault {
            if rising(0x80) {
                self.state = DeviceState::SwitchOnDisabled;
                self.objects.insert(objects::ERROR_CODE.address(), 0);
                self.objects.insert(objects::ERROR_REGISTER.address(), 0);
            }
            return;
        }
        use DeviceState::*;
        self.state = match (self.state, control) {
            (SwitchedOn | QuickStopActive, c) if c & 0x8f == 0x0f => OperationEnabled,
            (ReadyToSwitchOn | OperationEnabled, c) if c & 0x8f == 0x07 => SwitchedOn,
            (SwitchOnDisabled | SwitchedOn | OperationEnabled, c) if c & 0x87 == 0x06 => ReadyToSwitchOn,
            (OperationEnabled, c) if c & 0x86 == 0x02 => QuickStopActive,
            (ReadyToSwitchOn | SwitchedOn, c) if c & 0x86 == 0x02 => SwitchOnDisabled,
            (_, c) if c & 0x82 == 0x00 => SwitchOnDisabled,
            (state, _) => state,
        };
        if self.state != OperationEnabled {
            self.moving = false;
            self.acknowledge = false;
            return;
        }
        // new setpoint or homing start
        if rising(0x10) {
            match self.mode() {
                1 => {
                    self.acknowledge = true;
                    self.start_motion();
                },
                6 => self.start_motion(),
                _ => {},
            }
        }
        if control & 0x10 == 0 && self.mode() == 1
            {self.acknowledge = false}
    }

    /// process a request, return the error code and data of the answer
    fn access(&mut self, opcode: u8, address: Address, data: u32) -> (u32, u32) {
        if opcode == opcode::WRITE_OBJECT
            {self.writes.push((address, data))}
        if let Some(code) = self.refuse.get(&address)
            {return (code.0, 0)}
        match opcode {
            opcode::READ_OBJECT => {
                if address == objects::STATUSWORD.address() {
                    return (0, self.statusword())
                }
                match self.objects.get(&address) {
                    Some(&value) => (0, value),
                    None => (AbortCode::NO_OBJECT.0, 0),
                }
            },
            opcode::WRITE_OBJECT => {
                if address == objects::STATUSWORD.address() {
                    return (AbortCode::READ_ONLY.0, 0)
                }
                if address == objects::CONTROLWORD.address() {
                    self.controlword(data);
                }
                else if address == objects::CURRENT_LIMIT.address() {
                    let value = self.current_cap.map_or(data, |cap|  data.min(cap));
                    self.objects.insert(address, value);
                }
                else if address == objects::MODES_OF_OPERATION.address() {
                    self.objects.insert(address, data);
                    if !self.mode_stuck
                        {self.objects.insert(objects::MODES_OF_OPERATION_DISPLAY.address(), data);}
                }
                else {
                    self.objects.insert(address, data);
                    if address == objects::TARGET_VELOCITY.address()
                    && self.state == DeviceState::OperationEnabled
                    && self.mode() == 3
                        {self.start_motion()}
                }
                (0, 0)
            },
            _ => (AbortCode::UNKNOWN_COMMAND.0, 0),
        }
    }
}

impl Transport for Drive {
    type Error = Infallible;

    fn write(&mut self, data: &[u8]) -> Result<(), Infallible> {
        if self.silent
            {return Ok(())}
        let Ok(request) = frame::decode(data)
            else {return Ok(())};
        let payload = request.payload.as_slice();
        if payload.len() < 4 || payload[0] != self.node
            {return Ok(())}
        let address = Address {
            index: u16::from_le_bytes([payload[1], payload[2]]),
            sub: payload[3],
        };
        let data = match payload.get(4 .. 8) {
            Some(data) => u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            None => 0,
        };
        let (error, value) = self.access(request.opcode, address, data);

        let mut answer = Vec::from(error.to_le_bytes());
        if request.opcode == opcode::READ_OBJECT
            {answer.extend_from_slice(&value.to_le_bytes())}
        if self.garbled
            {answer.truncate(2)}
        let wire = frame::encode(opcode::ANSWER, &answer).expect("answer too long");
        self.answer.extend(wire.iter());
        Ok(())
    }
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, Infallible> {
        if self.answer.is_empty() {
            self.waited += timeout;
            return Ok(0);
        }
        let size = buffer.len().min(self.answer.len());
        for (dst, src) in buffer.iter_mut().zip(self.answer.drain(.. size)) {
            *dst = src;
        }
        Ok(size)
    }
    fn discard(&mut self) -> Result<(), Infallible> {
        self.answer.clear();
        Ok(())
    }
}
