//! Binary layouts for bets, batches and control messages.
//!
//! Every integer is big-endian. Strings are written as a one-byte length
//! followed by their UTF-8 bytes, so no string field may exceed 255 bytes.
//! Encoders return [`CodecError`] for invalid input instead of panicking;
//! decoders never return partially decoded data.

#![expect(clippy::big_endian_bytes, reason = "network protocol uses big-endian")]

use thiserror::Error;

use crate::message_type::MessageType;

/// Largest encoded message, tag included, accepted on the wire.
pub const MAX_MESSAGE_SIZE: usize = 8192;
/// Longest string field that fits behind a one-byte length prefix.
pub const MAX_FIELD_LEN: usize = 255;
/// Fixed width of the `YYYY-MM-DD` birth date.
pub const BIRTH_DATE_LEN: usize = 10;
/// Width of an acknowledgement payload.
pub const ACK_LEN: usize = 4;

/// Errors raised while encoding or decoding protocol payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A string field does not fit behind a one-byte length prefix.
    #[error("field {field} is {len} bytes, limit is 255")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Byte length of the rejected value.
        len: usize,
    },
    /// The birth date is not exactly ten bytes long.
    #[error("invalid birth date {0:?}")]
    InvalidDate(String),
    /// The batch grew past [`MAX_MESSAGE_SIZE`] while being encoded.
    #[error("batch reached {size} bytes, limit is {MAX_MESSAGE_SIZE}")]
    BatchTooLarge {
        /// Size the payload would have reached with the offending record.
        size: usize,
    },
    /// The batch holds more records than a `u16` count can describe.
    #[error("batch holds {0} records, limit is 65535")]
    TooManyRecords(usize),
    /// A batch without records carries no agency and cannot be decoded.
    #[error("empty batch")]
    EmptyBatch,
    /// The payload tag is not the one the caller expected.
    #[error("expected {expected} message, found {found}")]
    ProtocolMismatch {
        /// Tag the caller required.
        expected: MessageType,
        /// Tag found in the payload.
        found: MessageType,
    },
    /// A declared length runs past the end of the buffer.
    #[error("payload truncated")]
    Truncated,
    /// Bytes remain after a complete message was decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    /// A string field is not valid UTF-8.
    #[error("field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    /// An acknowledgement payload is not exactly four bytes.
    #[error("acknowledgement must be 4 bytes, got {0}")]
    InvalidAck(usize),
    /// The payload starts with a tag this client does not know.
    #[error("unknown message type {0}")]
    UnknownType(MessageType),
    /// A non-control tag was passed where `DONE`/`GET_WINNERS` was required.
    #[error("{0} is not a control message")]
    NotControl(MessageType),
}

/// One bet as reported by an agency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetRecord {
    /// Bettor's first name.
    pub first_name: String,
    /// Bettor's last name.
    pub last_name: String,
    /// Bettor's national identity document number.
    pub dni: String,
    /// Birth date formatted as `YYYY-MM-DD`.
    pub birth_date: String,
    /// Number the bettor chose.
    pub number: u32,
}

impl BetRecord {
    /// Build a record from its fields.
    #[must_use]
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        dni: impl Into<String>,
        birth_date: impl Into<String>,
        number: u32,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            dni: dni.into(),
            birth_date: birth_date.into(),
            number,
        }
    }

    /// Size of this record once encoded, agency byte included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + 3 + self.first_name.len() + self.last_name.len() + self.dni.len() + BIRTH_DATE_LEN + 4
    }
}

/// A protocol message carrying a tag.
///
/// Acknowledgements are untagged and handled by [`encode_ack`] and
/// [`decode_ack`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Legacy one-record submission.
    SingleBet {
        /// Submitting agency.
        agency: u8,
        /// The bet.
        record: BetRecord,
    },
    /// Ordered group of bets acknowledged as a unit.
    Batch {
        /// Submitting agency.
        agency: u8,
        /// Bets in submission order.
        records: Vec<BetRecord>,
    },
    /// Agency finished submitting.
    Done {
        /// Agency that finished.
        agency: u8,
    },
    /// Winners query.
    GetWinners {
        /// Querying agency.
        agency: u8,
    },
    /// Draw not performed yet.
    NotReady,
    /// Winning DNIs for the querying agency.
    WinnersList(Vec<String>),
}

impl Message {
    /// Tag written in the first byte of this message.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::SingleBet { .. } => MessageType::SingleBet,
            Self::Batch { .. } => MessageType::Batch,
            Self::Done { .. } => MessageType::Done,
            Self::GetWinners { .. } => MessageType::GetWinners,
            Self::NotReady => MessageType::NotReady,
            Self::WinnersList(_) => MessageType::WinnersList,
        }
    }

    /// Encode the message into a payload ready for framing.
    ///
    /// # Errors
    /// Returns the validation or size error raised by the matching encoder.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::SingleBet { agency, record } => encode_single_bet(*agency, record),
            Self::Batch { agency, records } => encode_batch(*agency, records),
            Self::Done { agency } => encode_control(MessageType::Done, *agency).map(Vec::from),
            Self::GetWinners { agency } => {
                encode_control(MessageType::GetWinners, *agency).map(Vec::from)
            }
            Self::NotReady => Ok(vec![MessageType::NotReady.into()]),
            Self::WinnersList(dnis) => encode_winners(dnis),
        }
    }

    /// Decode any tagged message.
    ///
    /// # Errors
    /// Returns [`CodecError::Truncated`] for short input,
    /// [`CodecError::TrailingBytes`] when bytes follow the message and
    /// [`CodecError::UnknownType`] for unknown tags.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        match peek_type(buf)? {
            MessageType::SingleBet => {
                let body = buf.get(1..).ok_or(CodecError::Truncated)?;
                let (agency, record, used) = decode_bet(body)?;
                ensure_consumed(body, used)?;
                Ok(Self::SingleBet { agency, record })
            }
            MessageType::Batch => {
                let (agency, records) = decode_batch(buf)?;
                Ok(Self::Batch { agency, records })
            }
            MessageType::Done | MessageType::GetWinners => match decode_control(buf)? {
                (MessageType::Done, agency) => Ok(Self::Done { agency }),
                (_, agency) => Ok(Self::GetWinners { agency }),
            },
            MessageType::NotReady => {
                ensure_consumed(buf, 1)?;
                Ok(Self::NotReady)
            }
            MessageType::WinnersList => decode_winners(buf).map(Self::WinnersList),
            other @ MessageType::Other(_) => Err(CodecError::UnknownType(other)),
        }
    }
}

/// Sequential reader over a received payload.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated)?;
        let bytes = self.buf.get(self.pos..end).ok_or(CodecError::Truncated)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        let [b] = self.array::<1>()?;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, CodecError> { Ok(u16::from_be_bytes(self.array()?)) }

    fn u32(&mut self) -> Result<u32, CodecError> { Ok(u32::from_be_bytes(self.array()?)) }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.take(N)?;
        bytes.try_into().map_err(|_| CodecError::Truncated)
    }

    fn string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = usize::from(self.u8()?);
        self.utf8(len, field)
    }

    fn utf8(&mut self, len: usize, field: &'static str) -> Result<String, CodecError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
    }

    const fn consumed(&self) -> usize { self.pos }
}

fn ensure_consumed(buf: &[u8], used: usize) -> Result<(), CodecError> {
    match buf.len().saturating_sub(used) {
        0 => Ok(()),
        extra => Err(CodecError::TrailingBytes(extra)),
    }
}

fn put_string(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), CodecError> {
    let len = u8::try_from(value.len()).map_err(|_| CodecError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.push(len);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Encode one bet as `[agency][first][last][dni][date:10][number:u32]`.
///
/// # Errors
/// Returns [`CodecError::FieldTooLong`] when a string exceeds 255 bytes and
/// [`CodecError::InvalidDate`] when the birth date is not ten bytes.
pub fn encode_bet(agency: u8, record: &BetRecord) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(record.encoded_len());
    buf.push(agency);
    put_string(&mut buf, "first_name", &record.first_name)?;
    put_string(&mut buf, "last_name", &record.last_name)?;
    put_string(&mut buf, "dni", &record.dni)?;
    if record.birth_date.len() != BIRTH_DATE_LEN {
        return Err(CodecError::InvalidDate(record.birth_date.clone()));
    }
    buf.extend_from_slice(record.birth_date.as_bytes());
    buf.extend_from_slice(&record.number.to_be_bytes());
    Ok(buf)
}

/// Decode one bet from the start of `buf`.
///
/// Returns the agency, the record and the number of bytes consumed so callers
/// can walk a batch body.
///
/// # Errors
/// Returns [`CodecError::Truncated`] when the buffer ends early and
/// [`CodecError::InvalidUtf8`] for undecodable strings.
pub fn decode_bet(buf: &[u8]) -> Result<(u8, BetRecord, usize), CodecError> {
    let mut cur = Cursor::new(buf);
    let (agency, record) = read_bet(&mut cur)?;
    Ok((agency, record, cur.consumed()))
}

fn read_bet(cur: &mut Cursor<'_>) -> Result<(u8, BetRecord), CodecError> {
    let agency = cur.u8()?;
    let first_name = cur.string("first_name")?;
    let last_name = cur.string("last_name")?;
    let dni = cur.string("dni")?;
    let birth_date = cur.utf8(BIRTH_DATE_LEN, "birth_date")?;
    let number = cur.u32()?;
    Ok((
        agency,
        BetRecord {
            first_name,
            last_name,
            dni,
            birth_date,
            number,
        },
    ))
}

/// Encode the legacy tagged single-bet message.
///
/// # Errors
/// Propagates the validation errors of [`encode_bet`].
pub fn encode_single_bet(agency: u8, record: &BetRecord) -> Result<Vec<u8>, CodecError> {
    let bet = encode_bet(agency, record)?;
    let mut buf = Vec::with_capacity(1 + bet.len());
    buf.push(MessageType::SingleBet.into());
    buf.extend_from_slice(&bet);
    Ok(buf)
}

/// Encode `[0x02][count:u16][bet]*count`.
///
/// The running size is checked after every record; the first record that
/// would push the payload past [`MAX_MESSAGE_SIZE`] fails the whole batch.
///
/// # Errors
/// Returns [`CodecError::BatchTooLarge`], [`CodecError::TooManyRecords`] or
/// any per-record validation error from [`encode_bet`].
pub fn encode_batch(agency: u8, records: &[BetRecord]) -> Result<Vec<u8>, CodecError> {
    let count =
        u16::try_from(records.len()).map_err(|_| CodecError::TooManyRecords(records.len()))?;
    let mut buf = Vec::with_capacity(MAX_MESSAGE_SIZE.min(3 + 64 * records.len()));
    buf.push(MessageType::Batch.into());
    buf.extend_from_slice(&count.to_be_bytes());
    for record in records {
        let bet = encode_bet(agency, record)?;
        let size = buf.len() + bet.len();
        if size > MAX_MESSAGE_SIZE {
            return Err(CodecError::BatchTooLarge { size });
        }
        buf.extend_from_slice(&bet);
    }
    Ok(buf)
}

/// Decode a batch payload, returning the agency and records in order.
///
/// # Errors
/// Returns [`CodecError::ProtocolMismatch`] for a non-batch tag,
/// [`CodecError::EmptyBatch`] for a zero count and
/// [`CodecError::Truncated`]/[`CodecError::TrailingBytes`] for length
/// mismatches.
pub fn decode_batch(buf: &[u8]) -> Result<(u8, Vec<BetRecord>), CodecError> {
    expect_type(buf, MessageType::Batch)?;
    let mut cur = Cursor::new(buf);
    cur.u8()?;
    let count = cur.u16()?;
    let mut agency = None;
    let mut records = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let (bet_agency, record) = read_bet(&mut cur)?;
        agency.get_or_insert(bet_agency);
        records.push(record);
    }
    ensure_consumed(buf, cur.consumed())?;
    let agency = agency.ok_or(CodecError::EmptyBatch)?;
    Ok((agency, records))
}

/// Encode a two-byte `[tag][agency]` control message.
///
/// # Errors
/// Returns [`CodecError::NotControl`] unless `ty` is `Done` or `GetWinners`.
pub fn encode_control(ty: MessageType, agency: u8) -> Result<[u8; 2], CodecError> {
    if !ty.is_control() {
        return Err(CodecError::NotControl(ty));
    }
    Ok([ty.into(), agency])
}

/// Decode a control message into its tag and agency.
///
/// # Errors
/// Returns [`CodecError::NotControl`] for other tags and
/// [`CodecError::Truncated`]/[`CodecError::TrailingBytes`] when the payload is
/// not exactly two bytes.
pub fn decode_control(buf: &[u8]) -> Result<(MessageType, u8), CodecError> {
    let ty = peek_type(buf)?;
    if !ty.is_control() {
        return Err(CodecError::NotControl(ty));
    }
    let agency = *buf.get(1).ok_or(CodecError::Truncated)?;
    ensure_consumed(buf, 2)?;
    Ok((ty, agency))
}

/// Read the tag from the first byte of a payload.
///
/// # Errors
/// Returns [`CodecError::Truncated`] for an empty payload.
pub fn peek_type(buf: &[u8]) -> Result<MessageType, CodecError> {
    buf.first()
        .copied()
        .map(MessageType::from)
        .ok_or(CodecError::Truncated)
}

fn expect_type(buf: &[u8], expected: MessageType) -> Result<(), CodecError> {
    let found = peek_type(buf)?;
    if found == expected {
        Ok(())
    } else {
        Err(CodecError::ProtocolMismatch { expected, found })
    }
}

/// Encode `[0x05][count:u16]([len:u8][dni])*count`.
///
/// # Errors
/// Returns [`CodecError::FieldTooLong`] for an oversized DNI,
/// [`CodecError::TooManyRecords`] past 65535 entries and
/// [`CodecError::BatchTooLarge`] past [`MAX_MESSAGE_SIZE`].
pub fn encode_winners<S: AsRef<str>>(dnis: &[S]) -> Result<Vec<u8>, CodecError> {
    let count = u16::try_from(dnis.len()).map_err(|_| CodecError::TooManyRecords(dnis.len()))?;
    let mut buf = Vec::new();
    buf.push(MessageType::WinnersList.into());
    buf.extend_from_slice(&count.to_be_bytes());
    for dni in dnis {
        put_string(&mut buf, "dni", dni.as_ref())?;
    }
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::BatchTooLarge { size: buf.len() });
    }
    Ok(buf)
}

/// Decode a winners list into DNIs in server order.
///
/// # Errors
/// Returns [`CodecError::ProtocolMismatch`] when the tag is not
/// `WinnersList` and [`CodecError::Truncated`] when an entry runs past the end
/// of the buffer. A partial list is never returned.
pub fn decode_winners(buf: &[u8]) -> Result<Vec<String>, CodecError> {
    expect_type(buf, MessageType::WinnersList)?;
    let mut cur = Cursor::new(buf);
    cur.u8()?;
    let count = cur.u16()?;
    let mut dnis = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        dnis.push(cur.string("dni")?);
    }
    ensure_consumed(buf, cur.consumed())?;
    Ok(dnis)
}

/// Encode the untagged four-byte acknowledgement.
#[must_use]
pub const fn encode_ack(number: u32) -> [u8; ACK_LEN] { number.to_be_bytes() }

/// Decode an acknowledgement into the confirmed bet number.
///
/// # Errors
/// Returns [`CodecError::InvalidAck`] unless the payload is exactly four bytes.
pub fn decode_ack(buf: &[u8]) -> Result<u32, CodecError> {
    let bytes: [u8; ACK_LEN] = buf
        .try_into()
        .map_err(|_| CodecError::InvalidAck(buf.len()))?;
    Ok(u32::from_be_bytes(bytes))
}
