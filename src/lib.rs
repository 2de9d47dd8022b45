/*!
    driver for maxon EPOS4 motion controllers over their serial protocol

    - [frame] encodes and decodes the binary frames of the serial link
    - [objects] lists the dictionary objects of the drive and the CiA-402 bitfields
    - [transport] abstracts the byte channel to the drive
    - [master] accesses the dictionary and drives the device state machine

    the core is `no_std` and only needs a [Transport](transport::Transport) and a [DelayNs](embedded_hal::delay::DelayNs) from the host. The `serial` feature provides a transport over a serial port.
*/
#![cfg_attr(not(test), no_std)]
#[cfg(feature = "std")]
extern crate std;

mod utils;

pub mod frame;
pub mod objects;
pub mod transport;
pub mod master;
