/*!
    binary frame codec of the EPOS serial protocol

    a frame on the wire is

    - the preamble `DLE STX`
    - the body: opcode, number of data words, data words, crc
    - every `DLE` byte in the body is doubled so the preamble cannot appear inside a frame

    all multi-byte fields are little endian. The crc is a CRC-CCITT (polynomial `0x1021`, seed 0) computed over the body words, each word fed high byte first.
*/

use crc::{Crc, CRC_16_XMODEM};
use log::*;
use thiserror::Error;


/// data link escape, first byte of the preamble and escape byte for stuffing
pub const DLE: u8 = 0x90;
/// start of text, second byte of the preamble
pub const STX: u8 = 0x02;

/// maximum number of 16 bit data words in a frame
pub const MAX_WORDS: usize = 32;
/// maximum number of data bytes in a frame
pub const MAX_PAYLOAD: usize = 2 * MAX_WORDS;
/// maximum unstuffed body size: opcode, length, data, crc
pub const MAX_BODY: usize = 2 + MAX_PAYLOAD + 2;
/// maximum frame size on the wire, when every body byte is escaped
pub const MAX_WIRE: usize = 2 + 2 * MAX_BODY;

/// opcodes used by this driver
pub mod opcode {
    /// answer from the drive to any request
    pub const ANSWER: u8 = 0x00;
    /// read an object of at most 4 bytes
    pub const READ_OBJECT: u8 = 0x60;
    /// write an object of at most 4 bytes
    pub const WRITE_OBJECT: u8 = 0x68;
}

/// data bytes of a frame
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;
/// stuffed bytes of a frame, ready to be sent
pub type Wire = heapless::Vec<u8, MAX_WIRE>;

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);


/// decoded frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Payload,
}

/// malformed or corrupted frame
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame does not start with DLE STX")]
    Preamble,
    #[error("escape byte followed by neither DLE nor STX")]
    Escape,
    #[error("frame length is odd or exceeds capacity")]
    Length,
    #[error("frame ended before its announced length")]
    Truncated,
    #[error("checksum mismatch, computed {expected:#06x} but received {received:#06x}")]
    Checksum { expected: u16, received: u16 },
    #[error("bytes remaining after a complete frame")]
    Trailing,
}


/**
    compute the checksum of an unstuffed frame body, without its crc field

    `body` is taken as little endian 16 bit words, each one is fed to the CRC high byte first. An odd trailing byte is ignored, bodies built by this module are always even.
*/
pub fn checksum(body: &[u8]) -> u16 {
    let mut digest = CRC.digest();
    for word in body.chunks_exact(2) {
        digest.update(&[word[1], word[0]]);
    }
    digest.finalize()
}

/// build the stuffed wire frame for the given opcode and data bytes
pub fn encode(opcode: u8, payload: &[u8]) -> Result<Wire, FrameError> {
    if payload.len() % 2 != 0 || payload.len() > MAX_PAYLOAD
        {return Err(FrameError::Length)}

    let mut body = heapless::Vec::<u8, MAX_BODY>::new();
    body.push(opcode).map_err(|_|  FrameError::Length)?;
    body.push((payload.len() / 2) as u8).map_err(|_|  FrameError::Length)?;
    body.extend_from_slice(payload).map_err(|_|  FrameError::Length)?;
    let crc = checksum(&body);
    body.extend_from_slice(&crc.to_le_bytes()).map_err(|_|  FrameError::Length)?;

    let wire = stuff(&body)?;
    trace!("encoded frame {:02x?}", wire.as_slice());
    Ok(wire)
}

/// prepend the preamble and double every `DLE` in the given body
pub fn stuff(body: &[u8]) -> Result<Wire, FrameError> {
    let mut wire = Wire::new();
    wire.extend_from_slice(&[DLE, STX]).map_err(|_|  FrameError::Length)?;
    for &byte in body {
        if byte == DLE {
            wire.push(DLE).map_err(|_|  FrameError::Length)?;
        }
        wire.push(byte).map_err(|_|  FrameError::Length)?;
    }
    Ok(wire)
}

/**
    decode exactly one frame spanning the whole given buffer

    the whole buffer is unstuffed and its checksum verified before the length field is trusted, so any corrupted bit of the body is reported as a checksum mismatch
*/
pub fn decode(wire: &[u8]) -> Result<Frame, FrameError> {
    let Some(stuffed) = wire.strip_prefix(&[DLE, STX])
        else {return Err(FrameError::Preamble)};

    let mut body = heapless::Vec::<u8, MAX_BODY>::new();
    let mut bytes = stuffed.iter();
    while let Some(&byte) = bytes.next() {
        if byte == DLE {
            match bytes.next() {
                Some(&DLE) => {},
                None => return Err(FrameError::Truncated),
                Some(_) => return Err(FrameError::Escape),
            }
        }
        body.push(byte).map_err(|_|  FrameError::Length)?;
    }
    if body.len() < 4
        {return Err(FrameError::Truncated)}
    if body.len() % 2 != 0
        {return Err(FrameError::Length)}

    let (content, crc) = body.split_at(body.len() - 2);
    let received = u16::from_le_bytes([crc[0], crc[1]]);
    let expected = checksum(content);
    if received != expected
        {return Err(FrameError::Checksum {expected, received})}

    // the checksum is consistent, the length field is now meaningful
    let words = usize::from(content[1]);
    if words > MAX_WORDS
        {return Err(FrameError::Length)}
    let announced = 2 + 2 * words;
    if content.len() < announced
        {return Err(FrameError::Truncated)}
    if content.len() > announced
        {return Err(FrameError::Trailing)}
    Ok(Frame {
        opcode: content[0],
        payload: Payload::from_slice(&content[2 ..]).map_err(|_|  FrameError::Length)?,
    })
}


/**
    streaming frame decoder

    bytes are pushed one at a time as they arrive from the serial link. Anything before a preamble is skipped, so the decoder catches up with the next frame after any corruption.
*/
#[derive(Debug, Default)]
pub struct Decoder {
    stage: Stage,
    body: heapless::Vec<u8, MAX_BODY>,
}
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
enum Stage {
    /// waiting for a `DLE`
    #[default]
    Idle,
    /// `DLE` received, waiting for `STX`
    Preamble,
    /// inside the frame body
    Body,
    /// inside the frame body, just after a `DLE`
    Escape,
}

impl Decoder {
    pub const fn new() -> Self {
        Self {
            stage: Stage::Idle,
            body: heapless::Vec::new(),
        }
    }
    /// forget any partially received frame
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.body.clear();
    }
    /// true if a frame has started and is not complete yet
    pub fn receiving(&self) -> bool {
        matches!(self.stage, Stage::Body | Stage::Escape)
    }
    /// feed one byte, return the frame or error if it terminates one
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        match self.stage {
            Stage::Idle => {
                if byte == DLE
                    {self.stage = Stage::Preamble}
                None
            },
            Stage::Preamble => {
                match byte {
                    STX => {
                        self.body.clear();
                        self.stage = Stage::Body;
                    },
                    DLE => {},
                    _ => self.stage = Stage::Idle,
                }
                None
            },
            Stage::Body => {
                if byte == DLE {
                    self.stage = Stage::Escape;
                    None
                }
                else {
                    self.accept(byte)
                }
            },
            Stage::Escape => match byte {
                DLE => {
                    self.stage = Stage::Body;
                    self.accept(DLE)
                },
                // a new frame started before the current one was complete
                STX => {
                    debug!("frame interrupted by a new preamble");
                    self.body.clear();
                    self.stage = Stage::Body;
                    Some(Err(FrameError::Truncated))
                },
                _ => {
                    self.reset();
                    Some(Err(FrameError::Escape))
                },
            },
        }
    }
    /// append an unstuffed body byte
    fn accept(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        if self.body.push(byte).is_err() {
            self.reset();
            return Some(Err(FrameError::Length));
        }
        if self.body.len() < 2
            {return None}
        let expected = 2 + 2 * usize::from(self.body[1]) + 2;
        if expected > MAX_BODY {
            self.reset();
            return Some(Err(FrameError::Length));
        }
        if self.body.len() < expected
            {return None}

        let result = parse(&self.body);
        self.reset();
        Some(result)
    }
}

/// check the crc of a complete unstuffed body and extract its content
fn parse(body: &[u8]) -> Result<Frame, FrameError> {
    let Some((content, crc)) = body.split_last_chunk::<2>()
        else {return Err(FrameError::Truncated)};
    let received = u16::from_le_bytes(*crc);
    let expected = checksum(content);
    if received != expected
        {return Err(FrameError::Checksum {expected, received})}
    let [opcode, _, data @ ..] = content
        else {return Err(FrameError::Truncated)};
    Ok(Frame {
        opcode: *opcode,
        payload: Payload::from_slice(data).map_err(|_|  FrameError::Length)?,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::vec::Vec;

    #[test]
    fn read_statusword_request() {
        // ReadObject 0x6041/0 on node 0
        let wire = encode(opcode::READ_OBJECT, &[0x00, 0x41, 0x60, 0x00]).unwrap();
        assert_eq!(wire.as_slice(), &[0x90, 0x02, 0x60, 0x02, 0x00, 0x41, 0x60, 0x00, 0x12, 0xe6]);
        assert_eq!(checksum(&[0x60, 0x02, 0x01, 0x41, 0x60, 0x00]), 0xd122);
    }

    #[test]
    fn escaped_answer() {
        // answer carrying the value 0x90, which must be doubled on the wire
        let wire = [0x90, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x90, 0x90, 0x00, 0x00, 0x00, 0x0c, 0xd5];
        let frame = decode(&wire).unwrap();
        assert_eq!(frame.opcode, opcode::ANSWER);
        assert_eq!(frame.payload.as_slice(), &[0, 0, 0, 0, 0x90, 0, 0, 0]);
        assert_eq!(encode(frame.opcode, &frame.payload).unwrap().as_slice(), &wire);
    }

    /// stuffed frame with a valid checksum over the given unstuffed content
    fn sealed(content: &[u8]) -> Wire {
        let mut body = Vec::from(content);
        body.extend_from_slice(&checksum(content).to_le_bytes());
        stuff(&body).unwrap()
    }

    #[test]
    fn malformed() {
        let good = encode(opcode::READ_OBJECT, &[0x00, 0x41, 0x60, 0x00]).unwrap();

        assert_eq!(decode(&good[1..]), Err(FrameError::Preamble));
        assert_eq!(decode(&[]), Err(FrameError::Preamble));
        for end in 2 .. 6 {
            assert_eq!(decode(&good[.. end]), Err(FrameError::Truncated));
        }
        // cut frames do not checksum
        for end in 6 .. good.len() {
            let result = decode(&good[.. end]);
            assert!(matches!(result, Err(FrameError::Checksum {..} | FrameError::Length)), "{:?}", result);
        }
        assert_eq!(decode(&[DLE, STX, 0x60, 0x02, DLE]), Err(FrameError::Truncated));

        let mut escape = good.clone();
        escape[5] = DLE;
        assert_eq!(decode(&escape), Err(FrameError::Escape));

        let mut crc = good.clone();
        crc[8] ^= 0x01;
        assert_eq!(decode(&crc), Err(FrameError::Checksum {expected: 0xe612, received: 0xe613}));

        // garbage after the frame breaks its checksum
        let mut trailing = good.clone();
        trailing.extend_from_slice(&[0x01, 0x00]).unwrap();
        assert!(matches!(decode(&trailing), Err(FrameError::Checksum {..})));
        // except zeros, the checksum of a frame followed by its crc being 0
        let mut trailing = good.clone();
        trailing.extend_from_slice(&[0x00, 0x00]).unwrap();
        assert_eq!(decode(&trailing), Err(FrameError::Trailing));

        // checksum consistent but length field disagreeing with the content
        assert_eq!(decode(&sealed(&[0x60, 0x01, 0x00, 0x41, 0x60, 0x00])), Err(FrameError::Trailing));
        assert_eq!(decode(&sealed(&[0x60, 0x03, 0x00, 0x41, 0x60, 0x00])), Err(FrameError::Truncated));
        assert_eq!(decode(&sealed(&[0x00, 0x40])), Err(FrameError::Length));

        assert_eq!(encode(0x00, &[1, 2, 3]), Err(FrameError::Length));
        assert_eq!(encode(0x00, &[0; MAX_PAYLOAD + 2]), Err(FrameError::Length));
    }

    #[test]
    fn length_corruption() {
        let mut body = Vec::from([0x60, 0x02, 0x00, 0x41, 0x60, 0x00]);
        body.extend_from_slice(&checksum(&body).to_le_bytes());
        for bit in 0 .. 8 {
            let mut corrupted = body.clone();
            corrupted[1] ^= 1 << bit;
            let result = decode(&stuff(&corrupted).unwrap());
            assert!(matches!(result, Err(FrameError::Checksum {..})), "bit {}: {:?}", bit, result);
        }
    }

    #[test]
    fn decoder_catches_up() {
        let first = encode(opcode::ANSWER, &[0, 0, 0, 0]).unwrap();
        let second = encode(opcode::ANSWER, &[1, 0, 0, 0x90]).unwrap();

        let mut stream = Vec::new();
        stream.extend_from_slice(&[0x12, 0x90, 0x33, 0xff]);
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&[0x00]);
        // interrupted frame
        stream.extend_from_slice(&second[.. 5]);
        stream.extend_from_slice(&second);

        let mut decoder = Decoder::new();
        let results: Vec<_> = stream.iter().filter_map(|&byte|  decoder.push(byte)).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().payload.as_slice(), &[0, 0, 0, 0]);
        assert_eq!(results[1], Err(FrameError::Truncated));
        assert_eq!(results[2].as_ref().unwrap().payload.as_slice(), &[1, 0, 0, 0x90]);
        assert!(!decoder.receiving());
    }

    proptest! {
        #[test]
        fn round_trip(opcode in any::<u8>(), words in proptest::collection::vec(any::<u16>(), 0 ..= MAX_WORDS)) {
            let payload: Vec<u8> = words.iter().flat_map(|w|  w.to_le_bytes()).collect();
            let frame = decode(&encode(opcode, &payload).unwrap()).unwrap();
            prop_assert_eq!(frame.opcode, opcode);
            prop_assert_eq!(frame.payload.as_slice(), payload.as_slice());
        }

        #[test]
        fn no_lone_marker(opcode in any::<u8>(), words in proptest::collection::vec(prop_oneof![Just(0x9090u16), Just(0x0290), any::<u16>()], 0 ..= MAX_WORDS)) {
            let payload: Vec<u8> = words.iter().flat_map(|w|  w.to_le_bytes()).collect();
            let wire = encode(opcode, &payload).unwrap();
            // past the preamble, DLE only appears in pairs
            let mut rest = &wire[2..];
            while let Some(position) = rest.iter().position(|&b|  b == DLE) {
                prop_assert_eq!(rest.get(position + 1), Some(&DLE));
                rest = &rest[position + 2 ..];
            }
            let frame = decode(&wire).unwrap();
            prop_assert_eq!(frame.payload.as_slice(), payload.as_slice());
        }

        #[test]
        fn single_bit_corruption(words in proptest::collection::vec(any::<u16>(), 1 ..= MAX_WORDS), bit in any::<proptest::sample::Index>()) {
            let payload: Vec<u8> = words.iter().flat_map(|w|  w.to_le_bytes()).collect();
            let mut body = Vec::new();
            body.extend_from_slice(&[opcode::WRITE_OBJECT, words.len() as u8]);
            body.extend_from_slice(&payload);
            let crc = checksum(&body);
            body.extend_from_slice(&crc.to_le_bytes());

            // any bit before the crc field, the length byte included
            let flipped = bit.index(8 * (2 + payload.len()));
            body[flipped / 8] ^= 1 << (flipped % 8);

            let result = decode(&stuff(&body).unwrap());
            prop_assert!(matches!(result, Err(FrameError::Checksum {..})), "{:?}", result);
        }
    }
}
