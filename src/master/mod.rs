/*!
    host side of the EPOS serial protocol, blocking and single threaded

    layers, each only using the one below:

    - [Dictionary] sends read/write requests for dictionary objects over a [Transport](crate::transport::Transport) and interprets the answers
    - [Controller] sequences dictionary accesses into the CiA-402 state machine and motion operations

    the link is half duplex: only one request is in flight at any time, which is enforced by every access borrowing the [Dictionary] mutably. For several axes, use one transport and one [Controller] per drive.
*/

/// object read and write requests
mod dictionary;
/// bounded polling shared by all waiting sequences
mod polling;
/// device state machine and motion profiles
mod controller;


pub use dictionary::Dictionary;
pub use polling::*;
pub use controller::*;


use core::time::Duration;
use thiserror::Error;
use crate::{
    frame::FrameError,
    objects::AbortCode,
    };

/**
    error while communicating with or controlling the drive

    `E` is the error type of the underlying transport
*/
#[derive(Error, Debug)]
pub enum Error<E> {
    #[error("transport failure: {0:?}")]
    Transport(E),
    #[error("no answer within timeout")]
    Timeout,
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("unexpected answer: {0}")]
    Protocol(&'static str),
    #[error("drive refused the access: {0}")]
    Device(AbortCode),
    /// the drive is in fault state, with the error code read from object 0x603F
    #[error("drive is in fault state, error code {0:#06x}")]
    Fault(u16),
    #[error("state transition not confirmed in time")]
    EnableTimeout,
    #[error("homing not attained in time")]
    HomingTimeout,
    #[error("motion target not reached in time")]
    MotionTimeout,
    #[error("operation mode not applied in time")]
    ModeTimeout,
    #[error("drive reported a homing error")]
    HomingFailed,
    #[error("invalid request: {0}")]
    Host(&'static str),
}


/// settings of the communication with one drive
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// node id of the drive, 0 addresses the drive plugged on the serial link
    pub node: u8,
    /// maximum silence while waiting an answer
    pub timeout: Duration,
    /// polling while waiting for state machine transitions and handshakes
    pub transition: Polling,
    /// polling while waiting for a motion or homing to complete
    pub motion: Polling,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            node: 0,
            timeout: Duration::from_millis(500),
            transition: Polling::new(Duration::from_millis(10), 100),
            motion: Polling::new(Duration::from_millis(10), 3000),
        }
    }
}
impl Config {
    pub fn with_node(mut self, node: u8) -> Self {
        self.node = node;
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_transition(mut self, polling: Polling) -> Self {
        self.transition = polling;
        self
    }
    pub fn with_motion(mut self, polling: Polling) -> Self {
        self.motion = polling;
        self
    }
}
