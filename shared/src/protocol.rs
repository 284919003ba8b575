//! Fixed-layout binary wire protocol
//!
//! Every datagram is a 19-byte big-endian [`PacketHeader`] followed by exactly
//! `payload_len` bytes of a [`Payload`] variant. Each variant has a constant
//! encoded size, so both directions work on caller-provided fixed buffers and
//! never allocate.

use bitflags::bitflags;
use thiserror::Error;

/// Sentinel bytes at the start of every datagram ("TS").
pub const MAGIC: [u8; 2] = [0x54, 0x53];
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 19;

pub const MAX_ROSTER_PLAYERS: usize = 16;
pub const MAX_PLOTS: usize = 32;
pub const PLOT_OWNER_LEN: usize = 42;
pub const PLOT_LABEL_LEN: usize = 36;

/// Upper bound for every movement-core packet.
pub const MAX_PAYLOAD_SIZE: usize = 2048;
/// Receive buffers are sized for the largest variant, which is `plots_sync`.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + PlotsSync::SIZE;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

/// Returns true if `s1` is newer than `s2`, tolerating wrap-around.
#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("invalid magic bytes {0:02x?}")]
    InvalidMagic([u8; 2]),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
    #[error("payload length mismatch: expected {expected}, got {actual}")]
    PayloadLengthMismatch { expected: usize, actual: usize },
    #[error("invalid direction byte {0}")]
    InvalidDirection(u8),
    #[error("count {count} exceeds maximum {max}")]
    CountOutOfRange { count: u8, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

bitflags! {
    /// Reliability bits. Defined on the wire but no retransmission is built on them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const RELIABLE = 1 << 0;
        const REQUIRES_ACK = 1 << 1;
        const FRAGMENTED = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 1,
    Move = 2,
    StateUpdate = 3,
    AllPlayersState = 4,
    Leave = 5,
    PlotsSync = 6,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            1 => Ok(MessageType::Ping),
            2 => Ok(MessageType::Move),
            3 => Ok(MessageType::StateUpdate),
            4 => Ok(MessageType::AllPlayersState),
            5 => Ok(MessageType::Leave),
            6 => Ok(MessageType::PlotsSync),
            other => Err(DecodeError::UnknownPacketType(other)),
        }
    }

    /// Fixed encoded payload size for this message type.
    pub const fn payload_size(self) -> usize {
        match self {
            MessageType::Ping => Ping::SIZE,
            MessageType::Move => Move::SIZE,
            MessageType::StateUpdate => StateUpdate::SIZE,
            MessageType::AllPlayersState => AllPlayersState::SIZE,
            MessageType::Leave => Leave::SIZE,
            MessageType::PlotsSync => PlotsSync::SIZE,
        }
    }
}

/// Movement direction, transmitted as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Direction {
    Up = 0,
    #[default]
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Direction {
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(Direction::Up),
            1 => Ok(Direction::Down),
            2 => Ok(Direction::Left),
            3 => Ok(Direction::Right),
            other => Err(DecodeError::InvalidDirection(other)),
        }
    }
}

/// Big-endian cursor over a fixed output slice.
///
/// Callers check the total size up front, so individual puts index directly.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    fn put_u16(&mut self, value: u16) {
        self.put_bytes(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.put_bytes(&value.to_be_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.put_bytes(&value.to_be_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.put_bytes(&value.to_be_bytes());
    }

    fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }
}

/// Big-endian cursor over a slice whose length was already validated.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_be_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }
}

fn ensure_dest(dest: &[u8], needed: usize) -> Result<(), EncodeError> {
    if dest.len() < needed {
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: dest.len(),
        });
    }
    Ok(())
}

fn ensure_src(src: &[u8], needed: usize) -> Result<(), DecodeError> {
    if src.len() < needed {
        return Err(DecodeError::BufferTooSmall {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub msg_type: MessageType,
    pub flags: PacketFlags,
    pub session_id: u32,
    pub sequence: u32,
    pub ack: u32,
    pub payload_len: u16,
}

impl PacketHeader {
    /// Builds a header for `msg_type`; `payload_len` is derived from the type.
    pub fn new(msg_type: MessageType, session_id: u32, sequence: u32, ack: u32) -> Self {
        Self {
            msg_type,
            flags: PacketFlags::empty(),
            session_id,
            sequence,
            ack,
            payload_len: msg_type.payload_size() as u16,
        }
    }

    pub fn encode<'a>(&self, dest: &'a mut [u8]) -> Result<&'a [u8], EncodeError> {
        ensure_dest(dest, HEADER_SIZE)?;
        let mut w = Writer::new(&mut dest[..HEADER_SIZE]);
        w.put_bytes(&MAGIC);
        w.put_u8(PROTOCOL_VERSION);
        w.put_u8(self.msg_type as u8);
        w.put_u8(self.flags.bits());
        w.put_u32(self.session_id);
        w.put_u32(self.sequence);
        w.put_u32(self.ack);
        w.put_u16(self.payload_len);
        Ok(&dest[..HEADER_SIZE])
    }

    /// Validates size, then magic, then version, before trusting the type byte.
    pub fn decode(src: &[u8]) -> Result<Self, DecodeError> {
        ensure_src(src, HEADER_SIZE)?;
        let mut r = Reader::new(&src[..HEADER_SIZE]);
        let magic = r.take::<2>();
        if magic != MAGIC {
            return Err(DecodeError::InvalidMagic(magic));
        }
        let version = r.u8();
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let msg_type = MessageType::from_byte(r.u8())?;
        let flags = PacketFlags::from_bits_retain(r.u8());
        Ok(Self {
            msg_type,
            flags,
            session_id: r.u32(),
            sequence: r.u32(),
            ack: r.u32(),
            payload_len: r.u16(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub timestamp: u64,
}

impl Ping {
    pub const SIZE: usize = 8;

    fn write(&self, w: &mut Writer<'_>) {
        w.put_u64(self.timestamp);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { timestamp: r.u64() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub direction: Direction,
    pub speed: f32,
    pub delta: f32,
}

impl Move {
    pub const SIZE: usize = 1 + 4 + 4;

    fn write(&self, w: &mut Writer<'_>) {
        w.put_u8(self.direction as u8);
        w.put_f32(self.speed);
        w.put_f32(self.delta);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let direction = Direction::from_byte(r.u8())?;
        Ok(Self {
            direction,
            speed: r.f32(),
            delta: r.f32(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateUpdate {
    pub x: f32,
    pub y: f32,
    pub timestamp_ns: i64,
}

impl StateUpdate {
    pub const SIZE: usize = 4 + 4 + 8;

    fn write(&self, w: &mut Writer<'_>) {
        w.put_f32(self.x);
        w.put_f32(self.y);
        w.put_i64(self.timestamp_ns);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            x: r.f32(),
            y: r.f32(),
            timestamp_ns: r.i64(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerEntry {
    pub session_id: u32,
    pub x: f32,
    pub y: f32,
}

impl PlayerEntry {
    pub const SIZE: usize = 4 + 4 + 4;
}

/// Full roster. Unused slots past `count` are encoded as zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AllPlayersState {
    pub count: u8,
    pub players: [PlayerEntry; MAX_ROSTER_PLAYERS],
}

impl AllPlayersState {
    pub const SIZE: usize = 1 + MAX_ROSTER_PLAYERS * PlayerEntry::SIZE;

    /// Appends an entry, returning false once the roster is full.
    pub fn push(&mut self, entry: PlayerEntry) -> bool {
        let idx = self.count as usize;
        if idx >= MAX_ROSTER_PLAYERS {
            return false;
        }
        self.players[idx] = entry;
        self.count += 1;
        true
    }

    pub fn entries(&self) -> &[PlayerEntry] {
        &self.players[..self.count as usize]
    }

    fn write(&self, w: &mut Writer<'_>) {
        w.put_u8(self.count);
        for entry in &self.players {
            w.put_u32(entry.session_id);
            w.put_f32(entry.x);
            w.put_f32(entry.y);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.u8();
        if count as usize > MAX_ROSTER_PLAYERS {
            return Err(DecodeError::CountOutOfRange {
                count,
                max: MAX_ROSTER_PLAYERS,
            });
        }
        let mut players = [PlayerEntry::default(); MAX_ROSTER_PLAYERS];
        for entry in players.iter_mut() {
            *entry = PlayerEntry {
                session_id: r.u32(),
                x: r.f32(),
                y: r.f32(),
            };
        }
        Ok(Self { count, players })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leave {
    pub reason: u8,
}

impl Leave {
    pub const SIZE: usize = 1;
    pub const REASON_QUIT: u8 = 0;

    fn write(&self, w: &mut Writer<'_>) {
        w.put_u8(self.reason);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { reason: r.u8() })
    }
}

/// One owned plot. Text fields are NUL-padded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotRecord {
    pub plot_id: u32,
    pub tile_x: u16,
    pub tile_y: u16,
    pub width: u16,
    pub height: u16,
    pub owner: [u8; PLOT_OWNER_LEN],
    pub label: [u8; PLOT_LABEL_LEN],
}

impl Default for PlotRecord {
    fn default() -> Self {
        Self {
            plot_id: 0,
            tile_x: 0,
            tile_y: 0,
            width: 0,
            height: 0,
            owner: [0; PLOT_OWNER_LEN],
            label: [0; PLOT_LABEL_LEN],
        }
    }
}

impl PlotRecord {
    pub const SIZE: usize = 4 + 2 * 4 + PLOT_OWNER_LEN + PLOT_LABEL_LEN;

    /// Copies `text` into a fixed field, truncating to fit.
    pub fn pack_text<const N: usize>(text: &str) -> [u8; N] {
        let mut out = [0u8; N];
        let bytes = text.as_bytes();
        let len = bytes.len().min(N);
        out[..len].copy_from_slice(&bytes[..len]);
        out
    }

    pub fn owner_str(&self) -> String {
        unpack_text(&self.owner)
    }

    pub fn label_str(&self) -> String {
        unpack_text(&self.label)
    }
}

fn unpack_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotsSync {
    pub count: u8,
    pub plots: [PlotRecord; MAX_PLOTS],
}

impl Default for PlotsSync {
    fn default() -> Self {
        Self {
            count: 0,
            plots: [PlotRecord::default(); MAX_PLOTS],
        }
    }
}

impl PlotsSync {
    pub const SIZE: usize = 1 + MAX_PLOTS * PlotRecord::SIZE;

    pub fn from_records(records: &[PlotRecord]) -> Self {
        let mut sync = Self::default();
        for (slot, record) in sync.plots.iter_mut().zip(records.iter().take(MAX_PLOTS)) {
            *slot = *record;
            sync.count += 1;
        }
        sync
    }

    pub fn entries(&self) -> &[PlotRecord] {
        &self.plots[..self.count as usize]
    }

    fn write(&self, w: &mut Writer<'_>) {
        w.put_u8(self.count);
        for plot in &self.plots {
            w.put_u32(plot.plot_id);
            w.put_u16(plot.tile_x);
            w.put_u16(plot.tile_y);
            w.put_u16(plot.width);
            w.put_u16(plot.height);
            w.put_bytes(&plot.owner);
            w.put_bytes(&plot.label);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let count = r.u8();
        if count as usize > MAX_PLOTS {
            return Err(DecodeError::CountOutOfRange {
                count,
                max: MAX_PLOTS,
            });
        }
        let mut plots = [PlotRecord::default(); MAX_PLOTS];
        for plot in plots.iter_mut() {
            *plot = PlotRecord {
                plot_id: r.u32(),
                tile_x: r.u16(),
                tile_y: r.u16(),
                width: r.u16(),
                height: r.u16(),
                owner: r.take(),
                label: r.take(),
            };
        }
        Ok(Self { count, plots })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ping(Ping),
    Move(Move),
    StateUpdate(StateUpdate),
    AllPlayersState(AllPlayersState),
    Leave(Leave),
    PlotsSync(Box<PlotsSync>),
}

impl Payload {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Payload::Ping(_) => MessageType::Ping,
            Payload::Move(_) => MessageType::Move,
            Payload::StateUpdate(_) => MessageType::StateUpdate,
            Payload::AllPlayersState(_) => MessageType::AllPlayersState,
            Payload::Leave(_) => MessageType::Leave,
            Payload::PlotsSync(_) => MessageType::PlotsSync,
        }
    }

    pub fn size(&self) -> usize {
        self.msg_type().payload_size()
    }

    /// Writes exactly `size()` bytes at the start of `dest`.
    pub fn encode<'a>(&self, dest: &'a mut [u8]) -> Result<&'a [u8], EncodeError> {
        let size = self.size();
        ensure_dest(dest, size)?;
        let mut w = Writer::new(&mut dest[..size]);
        match self {
            Payload::Ping(p) => p.write(&mut w),
            Payload::Move(p) => p.write(&mut w),
            Payload::StateUpdate(p) => p.write(&mut w),
            Payload::AllPlayersState(p) => p.write(&mut w),
            Payload::Leave(p) => p.write(&mut w),
            Payload::PlotsSync(p) => p.write(&mut w),
        }
        Ok(&dest[..size])
    }

    pub fn decode(msg_type: MessageType, src: &[u8]) -> Result<Self, DecodeError> {
        let expected = msg_type.payload_size();
        if src.len() != expected {
            return Err(DecodeError::PayloadLengthMismatch {
                expected,
                actual: src.len(),
            });
        }
        let mut r = Reader::new(src);
        Ok(match msg_type {
            MessageType::Ping => Payload::Ping(Ping::read(&mut r)?),
            MessageType::Move => Payload::Move(Move::read(&mut r)?),
            MessageType::StateUpdate => Payload::StateUpdate(StateUpdate::read(&mut r)?),
            MessageType::AllPlayersState => {
                Payload::AllPlayersState(AllPlayersState::read(&mut r)?)
            }
            MessageType::Leave => Payload::Leave(Leave::read(&mut r)?),
            MessageType::PlotsSync => Payload::PlotsSync(Box::new(PlotsSync::read(&mut r)?)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Payload,
}

impl Packet {
    pub fn new(session_id: u32, sequence: u32, ack: u32, payload: Payload) -> Self {
        Self {
            header: PacketHeader::new(payload.msg_type(), session_id, sequence, ack),
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.size()
    }

    /// Encodes header and payload into `dest`; the header's type and length
    /// are taken from the payload so the two can never disagree.
    pub fn encode<'a>(&self, dest: &'a mut [u8]) -> Result<&'a [u8], EncodeError> {
        let total = self.encoded_len();
        ensure_dest(dest, total)?;
        let header = PacketHeader {
            msg_type: self.payload.msg_type(),
            payload_len: self.payload.size() as u16,
            ..self.header
        };
        header.encode(dest)?;
        self.payload.encode(&mut dest[HEADER_SIZE..])?;
        Ok(&dest[..total])
    }

    pub fn decode(src: &[u8]) -> Result<Self, DecodeError> {
        let header = PacketHeader::decode(src)?;
        let payload_len = header.payload_len as usize;
        let body = &src[HEADER_SIZE..];
        if body.len() < payload_len {
            return Err(DecodeError::BufferTooSmall {
                needed: HEADER_SIZE + payload_len,
                available: src.len(),
            });
        }
        if body.len() > payload_len {
            return Err(DecodeError::PayloadLengthMismatch {
                expected: payload_len,
                actual: body.len(),
            });
        }
        let payload = Payload::decode(header.msg_type, body)?;
        Ok(Self { header, payload })
    }
}
