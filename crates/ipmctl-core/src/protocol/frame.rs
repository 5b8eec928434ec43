//! Frame decoding
//!
//! Decodes fixed-length binary frames into scaled values. Decoding is a pure
//! function of the frame layout and the bytes: every call yields a fresh
//! [`DecodedFrame`] and the layout is never modified.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::table::{Endianness, FieldSpec, FrameKind, FrameSpec};
use super::ProtocolError;

/// One decoded field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedField {
    /// Field name
    pub name: String,
    /// Unit of `value`
    pub unit: String,
    /// Field width in bytes
    pub byte_width: usize,
    /// Raw unsigned integer as read from the frame
    pub raw: u32,
    /// Scale factor applied to `raw`
    pub scale: f64,
    /// Raw value times the field's scale factor
    pub value: f64,
    /// Whether the field is a reserved placeholder
    pub reserved: bool,
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFrame {
    /// Frame kind
    pub kind: FrameKind,
    /// Fields in wire order
    pub fields: Vec<DecodedField>,
}

impl DecodedFrame {
    /// First field called `name`
    pub fn field(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Scaled value of the first field called `name`
    pub fn value(&self, name: &str) -> Option<f64> {
        self.field(name).map(|f| f.value)
    }

    /// Raw value of the first field called `name`
    pub fn raw(&self, name: &str) -> Option<u32> {
        self.field(name).map(|f| f.raw)
    }

    /// Fields that carry a defined quantity
    pub fn defined_fields(&self) -> impl Iterator<Item = &DecodedField> {
        self.fields.iter().filter(|f| !f.reserved)
    }
}

impl FrameSpec {
    /// Decode `data` into a fresh result.
    ///
    /// `data` must be exactly the frame length.
    pub fn decode(&self, data: &[u8], order: Endianness) -> Result<DecodedFrame, ProtocolError> {
        if data.len() != self.length {
            return Err(ProtocolError::ShortRead {
                expected: self.length,
                received: data.len(),
            });
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        let mut offset = 0;
        for spec in &self.fields {
            let end = offset + spec.byte_width;
            let bytes = data.get(offset..end).ok_or(ProtocolError::ShortRead {
                expected: end,
                received: data.len(),
            })?;
            let raw = read_raw(self, spec, bytes, order)?;
            fields.push(DecodedField {
                name: spec.name.clone(),
                unit: spec.unit.clone(),
                byte_width: spec.byte_width,
                raw,
                scale: spec.scale,
                value: spec.raw_to_display(raw),
                reserved: spec.is_reserved(),
            });
            offset = end;
        }

        Ok(DecodedFrame {
            kind: self.kind,
            fields,
        })
    }

    /// Encode one raw value per field into frame bytes.
    ///
    /// Values wider than their field are truncated to the field width.
    pub fn encode(&self, raw: &[u32], order: Endianness) -> Result<Vec<u8>, ProtocolError> {
        if raw.len() != self.fields.len() {
            return Err(ProtocolError::FrameLayout {
                frame: self.kind.label().to_string(),
                declared: self.fields.len(),
                actual: raw.len(),
            });
        }

        let mut data = vec![0u8; self.fields_width()];
        let mut offset = 0;
        for (spec, value) in self.fields.iter().zip(raw) {
            let slot = &mut data[offset..offset + spec.byte_width];
            match (spec.byte_width, order) {
                (1, _) => slot[0] = *value as u8,
                (2, Endianness::Little) => LittleEndian::write_u16(slot, *value as u16),
                (2, Endianness::Big) => BigEndian::write_u16(slot, *value as u16),
                (4, Endianness::Little) => LittleEndian::write_u32(slot, *value),
                (4, Endianness::Big) => BigEndian::write_u32(slot, *value),
                (width, _) => {
                    return Err(ProtocolError::FieldWidth {
                        frame: self.kind.label().to_string(),
                        field: spec.name.clone(),
                        width,
                    })
                }
            }
            offset += spec.byte_width;
        }
        Ok(data)
    }
}

fn read_raw(
    frame: &FrameSpec,
    spec: &FieldSpec,
    bytes: &[u8],
    order: Endianness,
) -> Result<u32, ProtocolError> {
    let raw = match (spec.byte_width, order) {
        (1, _) => bytes[0] as u32,
        (2, Endianness::Little) => LittleEndian::read_u16(bytes) as u32,
        (2, Endianness::Big) => BigEndian::read_u16(bytes) as u32,
        (4, Endianness::Little) => LittleEndian::read_u32(bytes),
        (4, Endianness::Big) => BigEndian::read_u32(bytes),
        (width, _) => {
            return Err(ProtocolError::FieldWidth {
                frame: frame.kind.label().to_string(),
                field: spec.name.clone(),
                width,
            })
        }
    };
    Ok(raw)
}

/// Self test verdict from a BITRESULT frame
#[derive(Debug, Clone, PartialEq)]
pub struct BitResult {
    /// All monitored voltages are within limits
    pub passed: bool,
    /// Decoded frame
    pub frame: DecodedFrame,
}

impl BitResult {
    /// Evaluate a decoded BITRESULT frame.
    ///
    /// A zero leading status word means every monitored voltage is within
    /// limits; nothing further is interpreted.
    pub fn evaluate(frame: DecodedFrame) -> Self {
        let passed = frame.fields.first().map(|f| f.raw == 0).unwrap_or(false);
        Self { passed, frame }
    }

    /// Raw leading status word
    pub fn status_word(&self) -> u32 {
        self.frame.fields.first().map(|f| f.raw).unwrap_or(0)
    }
}

/// Outcome of checking a RECORD frame's trailing CRC-32
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcCheck {
    /// Trailing CRC matches the computed one
    Match(u32),
    /// Trailing CRC differs
    Mismatch {
        /// CRC-32 of the preceding bytes
        computed: u32,
        /// CRC carried in the frame
        received: u32,
    },
}

impl CrcCheck {
    /// Whether the CRC matched
    pub fn is_match(&self) -> bool {
        matches!(self, CrcCheck::Match(_))
    }
}

/// Compare the trailing 4-byte CRC of `data` with the CRC-32 of the rest.
///
/// Returns `None` if `data` is too short to carry a CRC.
pub fn check_record_crc(data: &[u8], order: Endianness) -> Option<CrcCheck> {
    let split = data.len().checked_sub(4)?;
    let (body, tail) = data.split_at(split);
    let computed = crc32fast::hash(body);
    let received = match order {
        Endianness::Little => LittleEndian::read_u32(tail),
        Endianness::Big => BigEndian::read_u32(tail),
    };
    Some(if computed == received {
        CrcCheck::Match(computed)
    } else {
        CrcCheck::Mismatch { computed, received }
    })
}

/// Overwrite the trailing 4 bytes of `data` with the CRC-32 of the rest
pub fn seal_record_crc(data: &mut [u8], order: Endianness) {
    let Some(split) = data.len().checked_sub(4) else {
        return;
    };
    let crc = crc32fast::hash(&data[..split]);
    match order {
        Endianness::Little => LittleEndian::write_u32(&mut data[split..], crc),
        Endianness::Big => BigEndian::write_u32(&mut data[split..], crc),
    }
}
