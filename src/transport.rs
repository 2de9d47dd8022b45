/*!
    byte channel to the drive

    the driver only needs a duplex byte stream with a bounded blocking read, given by the [Transport] trait. With the `serial` feature, [SerialTransport] implements it over a serial port.
*/

use core::time::Duration;


/// duplex byte channel to the drive
pub trait Transport {
    type Error: core::fmt::Debug;

    /// send all the given bytes
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;
    /**
        receive available bytes into `buffer`, waiting at most `timeout` for the first one

        returns the number of bytes received, `0` meaning nothing arrived in time
    */
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;
    /// drop any received byte not read yet
    fn discard(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write(data)
    }
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        (**self).read(buffer, timeout)
    }
    fn discard(&mut self) -> Result<(), Self::Error> {
        (**self).discard()
    }
}


#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use core::time::Duration;
    use std::{io, path::Path};
    use serial2::{SerialPort, CharSize, StopBits, Parity, Settings};
    use log::*;

    /// [Transport](super::Transport) over a serial port
    pub struct SerialTransport {
        port: SerialPort,
        timeout: Option<Duration>,
    }
    impl SerialTransport {
        /// open the given serial port with the drive's default framing: 8 data bits, no parity, 1 stop bit
        pub fn open(path: impl AsRef<Path>, rate: u32) -> io::Result<Self> {
            Self::open_with(path, rate, Parity::None, StopBits::One)
        }
        /// open the given serial port with custom parity and stop bits
        pub fn open_with(path: impl AsRef<Path>, rate: u32, parity: Parity, stop: StopBits) -> io::Result<Self> {
            let port = SerialPort::open(path, |mut settings: Settings| {
                    settings.set_raw();
                    settings.set_baud_rate(rate)?;
                    settings.set_char_size(CharSize::Bits8);
                    settings.set_stop_bits(stop);
                    settings.set_parity(parity);
                    Ok(settings)
                    })?;
            // anything received before opening is garbage
            port.discard_input_buffer()?;
            Ok(Self::from(port))
        }
        pub fn port(&self) -> &SerialPort {&self.port}
    }
    impl From<SerialPort> for SerialTransport {
        fn from(port: SerialPort) -> Self {
            Self {port, timeout: None}
        }
    }

    impl super::Transport for SerialTransport {
        type Error = io::Error;

        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            self.port.write_all(data)
        }
        fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
            if self.timeout != Some(timeout) {
                self.port.set_read_timeout(timeout)?;
                self.timeout = Some(timeout);
            }
            match self.port.read(buffer) {
                Err(error) if error.kind() == io::ErrorKind::TimedOut => Ok(0),
                other => other,
            }
        }
        fn discard(&mut self) -> io::Result<()> {
            trace!("discarding serial input buffer");
            self.port.discard_input_buffer()
        }
    }
}
