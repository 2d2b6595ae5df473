//! # Beast Framing
//!
//! Splits the Beast binary stream into records without interpreting them.
//!
//! Each record is `0x1a`, a type byte, a 6-byte big-endian MLAT timestamp, one
//! signal-level byte and the raw message (2, 7 or 14 bytes depending on the
//! type). Any `0x1a` inside the record body is sent twice. A lone `0x1a`
//! followed by something other than `0x1a` always starts a new record, which is
//! how the decoder resynchronizes after garbage or a truncated record.

use serde::Serialize;

const SYNC: u8 = 0x1a;
const TIMESTAMP_LEN: usize = 6;
const SIGNAL_LEN: usize = 1;

/// Record types carried by the Beast protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// `'1'`: Mode A/C reply, 2 bytes.
    ModeAc,
    /// `'2'`: Mode S short reply, 7 bytes.
    ModeSShort,
    /// `'3'`: Mode S long reply, 14 bytes.
    ModeSLong,
    /// `'4'`: receiver status record, 14 bytes.
    Status,
}

impl FrameKind {
    /// Maps a type byte to its kind.
    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            b'1' => Some(Self::ModeAc),
            b'2' => Some(Self::ModeSShort),
            b'3' => Some(Self::ModeSLong),
            b'4' => Some(Self::Status),
            _ => None,
        }
    }

    /// Length of the message part, excluding timestamp and signal.
    pub fn message_len(self) -> usize {
        match self {
            Self::ModeAc => 2,
            Self::ModeSShort => 7,
            Self::ModeSLong | Self::Status => 14,
        }
    }
}

/// One unescaped Beast record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeastFrame {
    /// Record type from the type byte.
    pub kind: FrameKind,
    /// 48-bit MLAT counter.
    pub timestamp: u64,
    /// Signal level byte.
    pub signal: u8,
    /// Raw Mode A/C or Mode S bytes.
    pub message: Vec<u8>,
}

impl BeastFrame {
    fn from_body(kind: FrameKind, body: &[u8]) -> Self {
        let timestamp = body[..TIMESTAMP_LEN]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        Self {
            kind,
            timestamp,
            signal: body[TIMESTAMP_LEN],
            message: body[TIMESTAMP_LEN + SIGNAL_LEN..].to_vec(),
        }
    }
}

enum Step {
    Frame(BeastFrame, usize),
    Skip(usize),
    NeedMore,
}

/// # Beast Decoder
///
/// Incremental splitter. Bytes can arrive in arbitrary chunks; an incomplete
/// record is kept until the rest of it shows up.
#[derive(Debug, Default)]
pub struct BeastDecoder {
    pending: Vec<u8>,
    discarded: u64,
}

impl BeastDecoder {
    /// A decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every record completed by them.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<BeastFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < self.pending.len() {
            match self.step(pos) {
                Step::Frame(frame, next) => {
                    frames.push(frame);
                    pos = next;
                }
                Step::Skip(next) => {
                    self.discarded += (next - pos) as u64;
                    pos = next;
                }
                Step::NeedMore => break,
            }
        }
        self.pending.drain(..pos);
        frames
    }

    /// Bytes dropped while hunting for the next record start.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    fn step(&self, start: usize) -> Step {
        let buf = &self.pending;

        if buf[start] != SYNC {
            let next = buf[start..]
                .iter()
                .position(|b| *b == SYNC)
                .map_or(buf.len(), |off| start + off);
            return Step::Skip(next);
        }

        let Some(&type_byte) = buf.get(start + 1) else {
            return Step::NeedMore;
        };
        let kind = match FrameKind::from_type_byte(type_byte) {
            Some(kind) => kind,
            // An escaped sync outside a record is noise; skip the pair.
            None if type_byte == SYNC => return Step::Skip(start + 2),
            None => return Step::Skip(start + 1),
        };

        let body_len = TIMESTAMP_LEN + SIGNAL_LEN + kind.message_len();
        let mut body = Vec::with_capacity(body_len);
        let mut i = start + 2;
        while body.len() < body_len {
            let Some(&b) = buf.get(i) else {
                return Step::NeedMore;
            };
            if b == SYNC {
                match buf.get(i + 1) {
                    Some(&SYNC) => {
                        body.push(SYNC);
                        i += 2;
                    }
                    // A new record began before this one finished.
                    Some(_) => return Step::Skip(i),
                    None => return Step::NeedMore,
                }
            } else {
                body.push(b);
                i += 1;
            }
        }

        Step::Frame(BeastFrame::from_body(kind, &body), i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF17: [u8; 14] = [
        0x8d, 0x48, 0x40, 0xd6, 0x20, 0x2c, 0xc3, 0x71, 0xc3, 0x2c, 0xe0, 0x57, 0x60, 0x98,
    ];

    fn encode(type_byte: u8, timestamp: u64, signal: u8, message: &[u8]) -> Vec<u8> {
        let mut body = timestamp.to_be_bytes()[2..].to_vec();
        body.push(signal);
        body.extend_from_slice(message);

        let mut out = vec![SYNC, type_byte];
        for b in body {
            out.push(b);
            if b == SYNC {
                out.push(SYNC);
            }
        }
        out
    }

    #[test]
    fn test_decodes_long_frame() {
        let mut decoder = BeastDecoder::new();
        let frames = decoder.decode(&encode(b'3', 0x0102_0304_0506, 0xc8, &DF17));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::ModeSLong);
        assert_eq!(frames[0].timestamp, 0x0102_0304_0506);
        assert_eq!(frames[0].signal, 0xc8);
        assert_eq!(frames[0].message, DF17);
    }

    #[test]
    fn test_unescapes_sync_bytes_in_body() {
        let message = [0x5d, 0x1a, 0x40, 0xd6, 0x1a, 0x1a, 0x01];
        let bytes = encode(b'2', 0x1a, 0x1a, &message);

        let frames = BeastDecoder::new().decode(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::ModeSShort);
        assert_eq!(frames[0].timestamp, 0x1a);
        assert_eq!(frames[0].signal, 0x1a);
        assert_eq!(frames[0].message, message);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let bytes = encode(b'3', 42, 10, &DF17);
        let mut decoder = BeastDecoder::new();

        for (i, b) in bytes.iter().enumerate() {
            let frames = decoder.decode(std::slice::from_ref(b));
            if i + 1 < bytes.len() {
                assert!(frames.is_empty());
            } else {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].message, DF17);
            }
        }
    }

    #[test]
    fn test_skips_leading_garbage() {
        let mut bytes = vec![0x00, 0xff, 0x33, 0x10];
        bytes.extend(encode(b'1', 7, 3, &[0x12, 0x34]));

        let mut decoder = BeastDecoder::new();
        let frames = decoder.decode(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::ModeAc);
        assert_eq!(frames[0].message, vec![0x12, 0x34]);
        assert_eq!(decoder.discarded_bytes(), 4);
    }

    #[test]
    fn test_unknown_type_resyncs() {
        let mut bytes = vec![SYNC, b'9', 0x01, 0x02];
        bytes.extend(encode(b'3', 1, 2, &DF17));

        let frames = BeastDecoder::new().decode(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::ModeSLong);
    }

    #[test]
    fn test_truncated_frame_is_abandoned_for_next_sync() {
        // A long frame cut off after a few body bytes, then a complete short one.
        let mut bytes = encode(b'3', 1, 2, &DF17)[..6].to_vec();
        bytes.extend(encode(b'2', 3, 4, &DF17[..7]));

        let frames = BeastDecoder::new().decode(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, FrameKind::ModeSShort);
        assert_eq!(frames[0].timestamp, 3);
    }

    #[test]
    fn test_several_frames_in_one_chunk() {
        let mut bytes = encode(b'3', 1, 1, &DF17);
        bytes.extend(encode(b'2', 2, 2, &DF17[..7]));
        bytes.extend(encode(b'4', 3, 3, &[0u8; 14]));

        let kinds: Vec<_> = BeastDecoder::new()
            .decode(&bytes)
            .into_iter()
            .map(|f| f.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![FrameKind::ModeSLong, FrameKind::ModeSShort, FrameKind::Status]
        );
    }
}
