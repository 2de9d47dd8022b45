use embedded_hal::delay::DelayNs;
use log::*;

use crate::{
    objects::{self, Object, Value, Controlword, Statusword, DeviceState, Command, OperationMode},
    transport::Transport,
    };
use super::{Error, Config, Dictionary, Polling};


type ControlResult<T, B> = Result<T, Error<<B as Transport>::Error>>;

/// acceleration ramps of a profiled motion, in rpm/s
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ramp {
    pub acceleration: u32,
    pub deceleration: u32,
}
impl Ramp {
    /// same slope for acceleration and deceleration
    pub const fn symmetric(slope: u32) -> Self {
        Self {acceleration: slope, deceleration: slope}
    }
}

/// how a new position setpoint is interpreted
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Positioning {
    /// target is relative to the previous target rather than absolute
    pub relative: bool,
    /// abort the ongoing motion rather than chaining the new one after it
    pub immediate: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

/// homing procedures supported by this driver
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Homing {
    /// move until the current exceeds `threshold` (mA) against a mechanical stop
    HardStop {
        direction: Direction,
        /// searching speed in rpm
        speed: u32,
        threshold: u16,
    },
    /// move until the encoder index pulse
    IndexPulse {
        direction: Direction,
        /// searching speed in rpm
        speed: u32,
    },
    /// take the current position as home, without moving
    CurrentPosition,
}
impl Homing {
    /// homing method code in the drive
    pub const fn method(&self) -> i8 {
        match self {
            Self::HardStop {direction: Direction::Positive, ..} => -3,
            Self::HardStop {direction: Direction::Negative, ..} => -4,
            Self::IndexPulse {direction: Direction::Positive, ..} => 34,
            Self::IndexPulse {direction: Direction::Negative, ..} => 33,
            Self::CurrentPosition => 37,
        }
    }
}


/**
    CiA-402 device controller for one drive

    it owns the connection to the drive and the controlword it last commanded. The actual device state is never cached: it is read back from the statusword whenever needed.

    sequences of several accesses (enabling, moves, homing) stop at the first error. If the drive faulted the error is [Error::Fault] and nothing more is written, any other failure disables the drive voltage before returning so the drive is never left mid-sequence.
*/
pub struct Controller<B, D> {
    axis: Axis<B>,
    delay: D,
    transition: Polling,
    motion: Polling,
}

/// accesses to the drive, lent to polling checks apart from the delay
struct Axis<B> {
    dictionary: Dictionary<B>,
    /// last controlword written, read from the drive on first use
    control: Option<Controlword>,
}

impl<B: Transport, D: DelayNs> Controller<B, D> {
    pub fn new(bus: B, delay: D, config: Config) -> Self {
        Self {
            axis: Axis {
                dictionary: Dictionary::new(bus, &config),
                control: None,
            },
            delay,
            transition: config.transition,
            motion: config.motion,
        }
    }
    /// direct access to the object dictionary
    pub fn dictionary(&mut self) -> &mut Dictionary<B> {&mut self.axis.dictionary}
    pub fn into_inner(self) -> (B, D) {
        (self.axis.dictionary.into_transport(), self.delay)
    }

    pub fn read<T: Value>(&mut self, object: Object<T>) -> ControlResult<T, B> {
        self.axis.read(object)
    }
    pub fn write<T: Value>(&mut self, object: Object<T>, value: T) -> ControlResult<(), B> {
        self.axis.write(object, value)
    }

    /// current statusword
    pub fn status(&mut self) -> ControlResult<Statusword, B> {
        self.axis.status()
    }
    /// current device state, fault states included
    pub fn state(&mut self) -> ControlResult<DeviceState, B> {
        self.axis.state()
    }
    /// code of the pending error from object 0x603f, 0 if none
    pub fn fault_code(&mut self) -> ControlResult<u16, B> {
        self.read(objects::ERROR_CODE)
    }
    /// error register bitfield, each bit is an error category
    pub fn error_register(&mut self) -> ControlResult<u8, B> {
        self.read(objects::ERROR_REGISTER)
    }
    /// true if the error register signals any error
    pub fn faulted(&mut self) -> ControlResult<bool, B> {
        Ok(self.error_register()? != 0)
    }

    /// output current limit, in mA
    pub fn peak_current(&mut self) -> ControlResult<u32, B> {
        self.read(objects::CURRENT_LIMIT)
    }
    /// set the output current limit, in mA, and check the drive applied it
    pub fn set_peak_current(&mut self, milliamps: u32) -> ControlResult<(), B> {
        self.write(objects::CURRENT_LIMIT, milliamps)?;
        let applied = self.read(objects::CURRENT_LIMIT)?;
        if applied != milliamps {
            warn!("current limit set to {} mA but drive applies {} mA", milliamps, applied);
            return Err(Error::Protocol("current limit not applied"));
        }
        Ok(())
    }
    /// in encoder increments
    pub fn position(&mut self) -> ControlResult<i32, B> {
        self.read(objects::POSITION_ACTUAL)
    }
    /// in rpm
    pub fn velocity(&mut self) -> ControlResult<i32, B> {
        self.read(objects::VELOCITY_ACTUAL)
    }
    /// averaged motor current, in mA
    pub fn current(&mut self) -> ControlResult<i32, B> {
        self.read(objects::CURRENT_AVERAGED)
    }
    /// power supply voltage, in 0.1 V
    pub fn voltage(&mut self) -> ControlResult<u16, B> {
        self.read(objects::SUPPLY_VOLTAGE)
    }
    /// power stage temperature, in 0.1 °C
    pub fn temperature(&mut self) -> ControlResult<i16, B> {
        self.read(objects::TEMPERATURE)
    }

    /**
        bring the drive to [DeviceState::OperationEnabled] from whatever state it is in

        one controlword is written per transition, each one confirmed by polling the statusword. A faulted drive is not reset: [Error::Fault] is returned, use [Self::disable] to clear it.
    */
    pub fn enable(&mut self) -> ControlResult<(), B> {
        self.sequence(|this| {
            // a full walk takes 3 transitions, plus waiting the end of initialization
            for _ in 0 .. 5 {
                let state = this.axis.checked_state()?;
                let (command, target) = match state {
                    DeviceState::OperationEnabled => return Ok(()),
                    DeviceState::NotReadyToSwitchOn => {
                        debug!("waiting drive initialization");
                        this.wait(this.transition, Error::EnableTimeout, |axis| {
                            Ok((axis.checked_state()? != DeviceState::NotReadyToSwitchOn).then_some(()))
                        })?;
                        continue
                    },
                    DeviceState::SwitchOnDisabled => (Command::Shutdown, DeviceState::ReadyToSwitchOn),
                    DeviceState::ReadyToSwitchOn => (Command::SwitchOn, DeviceState::SwitchedOn),
                    DeviceState::SwitchedOn
                    | DeviceState::QuickStopActive => (Command::EnableOperation, DeviceState::OperationEnabled),
                    DeviceState::Fault
                    | DeviceState::FaultReactionActive => return Err(this.axis.fault()),
                };
                debug!("{:?} -> {:?}", state, target);
                this.transit(command, target)?;
            }
            Err(Error::EnableTimeout)
        })
    }

    /**
        bring the drive back to [DeviceState::SwitchOnDisabled]

        a faulted drive is reset, other states have their voltage disabled
    */
    pub fn disable(&mut self) -> ControlResult<(), B> {
        match self.state()? {
            DeviceState::SwitchOnDisabled => Ok(()),
            DeviceState::Fault | DeviceState::FaultReactionActive => self.reset_fault(),
            state => {
                debug!("{:?} -> {:?}", state, DeviceState::SwitchOnDisabled);
                self.axis.command(Command::DisableVoltage)?;
                self.wait(self.transition, Error::EnableTimeout, |axis| {
                    Ok((axis.state()? == DeviceState::SwitchOnDisabled).then_some(()))
                })
            },
        }
    }
    /// clear a drive fault, the drive goes to [DeviceState::SwitchOnDisabled]
    pub fn reset_fault(&mut self) -> ControlResult<(), B> {
        // the drive needs the fault reaction to end before accepting the reset
        self.wait(self.transition, Error::EnableTimeout, |axis| {
            Ok((axis.state()? != DeviceState::FaultReactionActive).then_some(()))
        })?;
        info!("resetting fault {:#06x}", self.fault_code()?);
        self.axis.command(Command::FaultResetLow)?;
        self.axis.command(Command::FaultReset)?;
        self.wait(self.transition, Error::EnableTimeout, |axis| {
            Ok((axis.state()? == DeviceState::SwitchOnDisabled).then_some(()))
        })
    }
    /// decelerate on the quick stop ramp and hold in [DeviceState::QuickStopActive]
    pub fn quick_stop(&mut self) -> ControlResult<(), B> {
        self.axis.command(Command::QuickStop)
    }
    /// stop the current motion on its profile deceleration, the drive stays enabled
    pub fn halt(&mut self) -> ControlResult<(), B> {
        self.axis.update(|control|  control.set_halt(true))
    }

    /// select the operation mode and wait for the drive to apply it
    pub fn set_mode(&mut self, mode: OperationMode) -> ControlResult<(), B> {
        self.write(objects::MODES_OF_OPERATION, mode.code())?;
        self.wait(self.transition, Error::ModeTimeout, |axis| {
            Ok((axis.read(objects::MODES_OF_OPERATION_DISPLAY)? == mode.code()).then_some(()))
        })
    }
    /// operation mode applied by the drive, the raw code is returned for modes this driver does not handle
    pub fn mode(&mut self) -> ControlResult<Result<OperationMode, i8>, B> {
        Ok(OperationMode::try_from(self.read(objects::MODES_OF_OPERATION_DISPLAY)?))
    }

    /**
        start rotating at `target` rpm in profile velocity mode

        this does not wait for the velocity to be reached, use [Self::wait_target_reached] for that
    */
    pub fn move_velocity(&mut self, target: i32, ramp: Ramp) -> ControlResult<(), B> {
        debug!("velocity {} rpm, {:?}", target, ramp);
        self.sequence(|this| {
            this.write(objects::PROFILE_ACCELERATION, ramp.acceleration)?;
            this.write(objects::PROFILE_DECELERATION, ramp.deceleration)?;
            this.set_mode(OperationMode::ProfileVelocity)?;
            this.write(objects::TARGET_VELOCITY, target)?;
            this.axis.update(|control|  control.set_halt(false))
        })
    }

    /**
        start moving to `target` increments in profile position mode, cruising at `velocity` rpm

        the new setpoint is handshaked with the drive, but this does not wait for the position to be reached, use [Self::wait_target_reached] for that
    */
    pub fn move_position(&mut self, target: i32, velocity: u32, ramp: Ramp, positioning: Positioning) -> ControlResult<(), B> {
        debug!("position {} at {} rpm, {:?} {:?}", target, velocity, ramp, positioning);
        self.sequence(|this| {
            this.write(objects::PROFILE_VELOCITY, velocity)?;
            this.write(objects::PROFILE_ACCELERATION, ramp.acceleration)?;
            this.write(objects::PROFILE_DECELERATION, ramp.deceleration)?;
            this.set_mode(OperationMode::ProfilePosition)?;
            this.write(objects::TARGET_POSITION, target)?;
            this.axis.update(|control| {
                control.set_relative(positioning.relative);
                control.set_immediately(positioning.immediate);
                control.set_halt(false);
                control.set_start(false);
            })?;
            // rising edge of new setpoint
            this.axis.update(|control|  control.set_start(true))?;
            this.wait(this.transition, Error::MotionTimeout, |axis| {
                Ok(axis.checked_status()?.setpoint_acknowledge().then_some(()))
            })?;
            this.axis.update(|control|  control.set_start(false))
        })
    }

    /// poll the statusword until the current motion reached its target
    pub fn wait_target_reached(&mut self) -> ControlResult<(), B> {
        self.wait(self.motion, Error::MotionTimeout, |axis| {
            Ok(axis.checked_status()?.target_reached().then_some(()))
        })
    }

    /**
        run a homing procedure and wait for its completion

        the drive must be enabled. On success the actual position is the home position.
    */
    pub fn home(&mut self, method: Homing) -> ControlResult<(), B> {
        debug!("homing {:?}", method);
        self.sequence(|this| {
            this.set_mode(OperationMode::Homing)?;
            this.write(objects::HOMING_METHOD, method.method())?;
            match method {
                Homing::HardStop {speed, threshold, ..} => {
                    this.write(objects::HOMING_CURRENT_THRESHOLD, threshold)?;
                    this.write(objects::HOMING_SPEED_SWITCH, speed)?;
                },
                Homing::IndexPulse {speed, ..} => {
                    this.write(objects::HOMING_SPEED_SWITCH, speed)?;
                    this.write(objects::HOMING_SPEED_ZERO, speed)?;
                },
                Homing::CurrentPosition => {},
            }
            this.axis.update(|control| {
                control.set_halt(false);
                control.set_start(false);
            })?;
            // rising edge of homing start
            this.axis.update(|control|  control.set_start(true))?;
            this.wait(this.motion, Error::HomingTimeout, |axis| {
                let status = axis.checked_status()?;
                if status.homing_error()
                    {return Err(Error::HomingFailed)}
                Ok((status.homing_attained() && status.target_reached()).then_some(()))
            })?;
            info!("homing attained");
            this.axis.update(|control|  control.set_start(false))
        })
    }

    /// write a command and wait for the drive to reach the expected state
    fn transit(&mut self, command: Command, target: DeviceState) -> ControlResult<(), B> {
        self.axis.command(command)?;
        self.wait(self.transition, Error::EnableTimeout, |axis| {
            Ok((axis.checked_state()? == target).then_some(()))
        })
    }

    /// poll until `check` returns a value, or fail with `timeout`
    fn wait<T>(
        &mut self,
        polling: Polling,
        timeout: Error<B::Error>,
        check: impl FnMut(&mut Axis<B>) -> ControlResult<Option<T>, B>,
        ) -> ControlResult<T, B>
    {
        match polling.until(&mut self.delay, &mut self.axis, check)? {
            Some(value) => Ok(value),
            None => {
                debug!("{} after {:?}", timeout, polling.bound());
                Err(timeout)
            },
        }
    }

    /**
        run a multi-step sequence, bringing the drive to a safe state if it fails

        on fault nothing more is sent, the drive already is in a well defined state
    */
    fn sequence<T>(&mut self, steps: impl FnOnce(&mut Self) -> ControlResult<T, B>) -> ControlResult<T, B> {
        let result = steps(self);
        if let Err(error) = &result {
            if !matches!(error, Error::Fault(_)) {
                warn!("sequence aborted: {}, disabling drive voltage", error);
                if let Err(secured) = self.axis.command(Command::DisableVoltage) {
                    warn!("failed to disable drive voltage: {}", secured);
                }
            }
        }
        result
    }
}

impl<B: Transport> Axis<B> {
    fn read<T: Value>(&mut self, object: Object<T>) -> ControlResult<T, B> {
        self.dictionary.read(object)
    }
    fn write<T: Value>(&mut self, object: Object<T>, value: T) -> ControlResult<(), B> {
        self.dictionary.write(object, value)
    }
    fn status(&mut self) -> ControlResult<Statusword, B> {
        self.read(objects::STATUSWORD)
    }
    fn state(&mut self) -> ControlResult<DeviceState, B> {
        DeviceState::decode(self.status()?)
            .ok_or(Error::Protocol("statusword matches no device state"))
    }
    /// statusword, or the fault error if the drive faulted
    fn checked_status(&mut self) -> ControlResult<Statusword, B> {
        let status = self.status()?;
        if status.fault()
            {return Err(self.fault())}
        Ok(status)
    }
    /// device state, or the fault error if the drive faulted
    fn checked_state(&mut self) -> ControlResult<DeviceState, B> {
        DeviceState::decode(self.checked_status()?)
            .ok_or(Error::Protocol("statusword matches no device state"))
    }
    /// the error to report for a faulted drive
    fn fault(&mut self) -> Error<B::Error> {
        match self.read(objects::ERROR_CODE) {
            Ok(code) => {
                warn!("drive fault {:#06x}", code);
                Error::Fault(code)
            },
            Err(error) => error,
        }
    }

    /// apply a state machine command to the controlword
    fn command(&mut self, command: Command) -> ControlResult<(), B> {
        let control = command.apply(self.controlword()?);
        self.send(control)
    }
    /// modify some bits of the commanded controlword
    fn update(&mut self, change: impl FnOnce(&mut Controlword)) -> ControlResult<(), B> {
        let mut control = self.controlword()?;
        change(&mut control);
        self.send(control)
    }
    fn controlword(&mut self) -> ControlResult<Controlword, B> {
        match self.control {
            Some(control) => Ok(control),
            None => self.read(objects::CONTROLWORD),
        }
    }
    fn send(&mut self, control: Controlword) -> ControlResult<(), B> {
        trace!("controlword {:#06x}", u16::from(control));
        // forget the commanded state if we do not know whether the drive received it
        self.control = None;
        self.write(objects::CONTROLWORD, control)?;
        self.control = Some(control);
        Ok(())
    }
}
