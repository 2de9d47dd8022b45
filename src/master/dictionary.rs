use core::time::Duration;
use packbytes::{FromBytes, ToBytes};
use log::*;

use crate::{
    frame::{self, Frame, Decoder, opcode, MAX_WIRE},
    objects::{Address, Object, Value, Width, AbortCode},
    transport::Transport,
    };
use super::{Error, Config};


type DictionaryResult<T, B> = Result<T, Error<<B as Transport>::Error>>;

/// data words of a ReadObject request
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
struct ReadRequest {
    node: u8,
    index: u16,
    sub: u8,
}
/// data words of a WriteObject request
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
struct WriteRequest {
    node: u8,
    index: u16,
    sub: u8,
    /// value sign or zero extended to 32 bits
    data: u32,
}
/// data words of the answer to a ReadObject
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
struct ReadAnswer {
    error: u32,
    data: u32,
}
/// data words of the answer to a WriteObject
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
struct WriteAnswer {
    error: u32,
}


/**
    object dictionary client

    every access is a blocking request/answer round trip with the drive, nothing is cached. Errors are returned as is, never retried.
*/
pub struct Dictionary<B> {
    bus: B,
    node: u8,
    timeout: Duration,
    decoder: Decoder,
}
impl<B: Transport> Dictionary<B> {
    pub fn new(bus: B, config: &Config) -> Self {
        Self {
            bus,
            node: config.node,
            timeout: config.timeout,
            decoder: Decoder::new(),
        }
    }
    pub fn node(&self) -> u8 {self.node}
    pub fn transport(&mut self) -> &mut B {&mut self.bus}
    pub fn into_transport(self) -> B {self.bus}

    /// read a typed object
    pub fn read<T: Value>(&mut self, object: Object<T>) -> DictionaryResult<T, B> {
        Ok(T::from_raw(self.read_raw(object.address(), T::WIDTH)?))
    }
    /// write a typed object
    pub fn write<T: Value>(&mut self, object: Object<T>, value: T) -> DictionaryResult<(), B> {
        self.write_raw(object.address(), value.to_raw(), T::WIDTH)
    }

    /**
        read the object at the given address, expecting a value of the given width

        the drive always answers with 4 data bytes, bytes beyond `width` must only extend the value. The result is zero extended.
    */
    pub fn read_raw(&mut self, address: Address, width: Width) -> DictionaryResult<u32, B> {
        let request = ReadRequest {
            node: self.node,
            index: address.index,
            sub: address.sub,
        };
        let answer = self.exchange(opcode::READ_OBJECT, request.to_le_bytes().as_ref())?;
        check_opcode(&answer)?;
        let answer = ReadAnswer::from_le_bytes(
            answer.payload.as_slice().try_into()
            .map_err(|_|  abort_or(&answer, "read answer has unexpected length"))?
            );
        if answer.error != 0 {
            debug!("read {} refused: {}", address, AbortCode(answer.error));
            return Err(Error::Device(AbortCode(answer.error)));
        }
        if !width.fits(answer.data)
            {return Err(Error::Protocol("read value is wider than expected"))}
        trace!("read {} = {:#x}", address, answer.data & width.mask());
        Ok(answer.data & width.mask())
    }

    /**
        write the object at the given address

        `raw` must be the sign or zero extension of a value of the given width
    */
    pub fn write_raw(&mut self, address: Address, raw: u32, width: Width) -> DictionaryResult<(), B> {
        if !width.fits(raw)
            {return Err(Error::Host("value does not fit object width"))}
        let request = WriteRequest {
            node: self.node,
            index: address.index,
            sub: address.sub,
            data: raw,
        };
        trace!("write {} = {:#x}", address, raw);
        let answer = self.exchange(opcode::WRITE_OBJECT, request.to_le_bytes().as_ref())?;
        check_opcode(&answer)?;
        let answer = WriteAnswer::from_le_bytes(
            answer.payload.as_slice().try_into()
            .map_err(|_|  abort_or(&answer, "write answer has unexpected length"))?
            );
        if answer.error != 0 {
            debug!("write {} refused: {}", address, AbortCode(answer.error));
            return Err(Error::Device(AbortCode(answer.error)));
        }
        Ok(())
    }

    /// send one request and wait for its answer
    fn exchange(&mut self, opcode: u8, data: &[u8]) -> DictionaryResult<Frame, B> {
        let wire = frame::encode(opcode, data)?;
        // drop leftovers of a previous exchange that timed out
        self.bus.discard().map_err(Error::Transport)?;
        self.decoder.reset();
        self.bus.write(&wire).map_err(Error::Transport)?;
        self.receive()
    }
    /// receive bytes until a complete frame or an error
    fn receive(&mut self) -> DictionaryResult<Frame, B> {
        let mut chunk = [0u8; 32];
        let mut received = 0;
        loop {
            let size = self.bus.read(&mut chunk, self.timeout).map_err(Error::Transport)?;
            if size == 0 {
                // the drive stopped in the middle of a frame
                if self.decoder.receiving() {
                    debug!("answer interrupted after {:?}", self.timeout);
                    return Err(frame::FrameError::Truncated.into());
                }
                debug!("no answer after {:?}", self.timeout);
                return Err(Error::Timeout);
            }
            for &byte in &chunk[.. size.min(chunk.len())] {
                if let Some(result) = self.decoder.push(byte) {
                    let frame = result?;
                    trace!("received frame {:02x} {:02x?}", frame.opcode, frame.payload.as_slice());
                    return Ok(frame);
                }
            }
            // a drive continuously sending garbage must not block us forever
            received += size;
            if received > 2 * MAX_WIRE
                {return Err(frame::FrameError::Length.into())}
        }
    }
}

fn check_opcode<E>(answer: &Frame) -> Result<(), Error<E>> {
    if answer.opcode != opcode::ANSWER
        {return Err(Error::Protocol("unexpected answer opcode"))}
    Ok(())
}

/// an answer with unexpected length can still carry an abort code
fn abort_or<E>(answer: &Frame, otherwise: &'static str) -> Error<E> {
    match answer.payload.first_chunk::<4>() {
        Some(&error) if u32::from_le_bytes(error) != 0 => Error::Device(AbortCode(u32::from_le_bytes(error))),
        _ => Error::Protocol(otherwise),
    }
}
