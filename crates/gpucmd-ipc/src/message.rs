//! Binary channel message format.
//!
//! Little-endian, tag-prefixed, strict: unknown tags, short reads and
//! trailing bytes are all decode errors. Frames are delimited by the
//! transport; this module defines their contents.

use gpucmd_protocol::{CbError, State};
use thiserror::Error;

/// Per-context route on a channel. Route 0 is the channel's control route.
pub type RouteId = i32;

pub const CONTROL_ROUTE_ID: RouteId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Initialize { ring_handle: u32, size: u32 },
    GetState,
    AsyncGetState,
    Flush { put_offset: i32, last_known_get: i32 },
    AsyncFlush { put_offset: i32 },
    CreateTransferBuffer { size: u32, id_request: i32 },
    RegisterTransferBuffer { handle: u32, size: u32, id_request: i32 },
    DestroyTransferBuffer { id: i32 },
    GetTransferBuffer { id: i32 },
    ResizeOffscreenFrameBuffer { size: Size },
    SetWindowSize { size: Size },
    // Control route.
    CreateOffscreenCommandBuffer { size: Size, parent_route_id: RouteId, parent_texture_id: u32 },
    CreateViewCommandBuffer { view_id: i32, size: Size },
    DestroyCommandBuffer { route_id: RouteId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Initialized(bool),
    State(State),
    TransferBufferId(i32),
    /// `handle` 0 with size 0 means the id was unknown.
    TransferBuffer { handle: u32, size: u32 },
    Ack,
    /// Route of a newly created command buffer, or a negative value on failure.
    RouteCreated(RouteId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    UpdateState(State),
    SwapBuffers,
    ContextLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Expects exactly one `Reply` with the same `request_id`.
    Request { route_id: RouteId, request_id: u32, body: Request },
    /// Fire-and-forget request.
    Post { route_id: RouteId, body: Request },
    Reply { route_id: RouteId, request_id: u32, body: Reply },
    Event { route_id: RouteId, body: Event },
}

impl Message {
    pub fn route_id(&self) -> RouteId {
        match self {
            Message::Request { route_id, .. }
            | Message::Post { route_id, .. }
            | Message::Reply { route_id, .. }
            | Message::Event { route_id, .. } => *route_id,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of message")]
    UnexpectedEof,
    #[error("invalid enum value")]
    InvalidEnum,
    #[error("unknown tag {0:#06x}")]
    UnknownTag(u16),
    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
    #[error("message too large")]
    OversizedMessage,
}

/// Upper bound on an encoded message.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

const MSG_TAG_REQUEST: u16 = 0x0001;
const MSG_TAG_POST: u16 = 0x0002;
const MSG_TAG_REPLY: u16 = 0x0003;
const MSG_TAG_EVENT: u16 = 0x0004;

const REQ_TAG_INITIALIZE: u16 = 0x0100;
const REQ_TAG_GET_STATE: u16 = 0x0101;
const REQ_TAG_ASYNC_GET_STATE: u16 = 0x0102;
const REQ_TAG_FLUSH: u16 = 0x0103;
const REQ_TAG_ASYNC_FLUSH: u16 = 0x0104;
const REQ_TAG_CREATE_TRANSFER_BUFFER: u16 = 0x0105;
const REQ_TAG_REGISTER_TRANSFER_BUFFER: u16 = 0x0106;
const REQ_TAG_DESTROY_TRANSFER_BUFFER: u16 = 0x0107;
const REQ_TAG_GET_TRANSFER_BUFFER: u16 = 0x0108;
const REQ_TAG_RESIZE_OFFSCREEN: u16 = 0x0109;
const REQ_TAG_SET_WINDOW_SIZE: u16 = 0x010A;
const REQ_TAG_CREATE_OFFSCREEN: u16 = 0x0180;
const REQ_TAG_CREATE_VIEW: u16 = 0x0181;
const REQ_TAG_DESTROY_COMMAND_BUFFER: u16 = 0x0182;

const REPLY_TAG_INITIALIZED: u16 = 0x0200;
const REPLY_TAG_STATE: u16 = 0x0201;
const REPLY_TAG_TRANSFER_BUFFER_ID: u16 = 0x0202;
const REPLY_TAG_TRANSFER_BUFFER: u16 = 0x0203;
const REPLY_TAG_ACK: u16 = 0x0204;
const REPLY_TAG_ROUTE_CREATED: u16 = 0x0205;

const EVT_TAG_UPDATE_STATE: u16 = 0x0300;
const EVT_TAG_SWAP_BUFFERS: u16 = 0x0301;
const EVT_TAG_CONTEXT_LOST: u16 = 0x0302;

pub fn encode_message(msg: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    encode_message_into(msg, &mut out);
    out
}

pub fn encode_message_into(msg: &Message, out: &mut Vec<u8>) {
    match msg {
        Message::Request {
            route_id,
            request_id,
            body,
        } => {
            push_u16(out, MSG_TAG_REQUEST);
            push_i32(out, *route_id);
            push_u32(out, *request_id);
            encode_request(body, out);
        }
        Message::Post { route_id, body } => {
            push_u16(out, MSG_TAG_POST);
            push_i32(out, *route_id);
            encode_request(body, out);
        }
        Message::Reply {
            route_id,
            request_id,
            body,
        } => {
            push_u16(out, MSG_TAG_REPLY);
            push_i32(out, *route_id);
            push_u32(out, *request_id);
            encode_reply(body, out);
        }
        Message::Event { route_id, body } => {
            push_u16(out, MSG_TAG_EVENT);
            push_i32(out, *route_id);
            encode_event(body, out);
        }
    }
}

fn encode_request(req: &Request, out: &mut Vec<u8>) {
    match req {
        Request::Initialize { ring_handle, size } => {
            push_u16(out, REQ_TAG_INITIALIZE);
            push_u32(out, *ring_handle);
            push_u32(out, *size);
        }
        Request::GetState => push_u16(out, REQ_TAG_GET_STATE),
        Request::AsyncGetState => push_u16(out, REQ_TAG_ASYNC_GET_STATE),
        Request::Flush {
            put_offset,
            last_known_get,
        } => {
            push_u16(out, REQ_TAG_FLUSH);
            push_i32(out, *put_offset);
            push_i32(out, *last_known_get);
        }
        Request::AsyncFlush { put_offset } => {
            push_u16(out, REQ_TAG_ASYNC_FLUSH);
            push_i32(out, *put_offset);
        }
        Request::CreateTransferBuffer { size, id_request } => {
            push_u16(out, REQ_TAG_CREATE_TRANSFER_BUFFER);
            push_u32(out, *size);
            push_i32(out, *id_request);
        }
        Request::RegisterTransferBuffer {
            handle,
            size,
            id_request,
        } => {
            push_u16(out, REQ_TAG_REGISTER_TRANSFER_BUFFER);
            push_u32(out, *handle);
            push_u32(out, *size);
            push_i32(out, *id_request);
        }
        Request::DestroyTransferBuffer { id } => {
            push_u16(out, REQ_TAG_DESTROY_TRANSFER_BUFFER);
            push_i32(out, *id);
        }
        Request::GetTransferBuffer { id } => {
            push_u16(out, REQ_TAG_GET_TRANSFER_BUFFER);
            push_i32(out, *id);
        }
        Request::ResizeOffscreenFrameBuffer { size } => {
            push_u16(out, REQ_TAG_RESIZE_OFFSCREEN);
            push_size(out, *size);
        }
        Request::SetWindowSize { size } => {
            push_u16(out, REQ_TAG_SET_WINDOW_SIZE);
            push_size(out, *size);
        }
        Request::CreateOffscreenCommandBuffer {
            size,
            parent_route_id,
            parent_texture_id,
        } => {
            push_u16(out, REQ_TAG_CREATE_OFFSCREEN);
            push_size(out, *size);
            push_i32(out, *parent_route_id);
            push_u32(out, *parent_texture_id);
        }
        Request::CreateViewCommandBuffer { view_id, size } => {
            push_u16(out, REQ_TAG_CREATE_VIEW);
            push_i32(out, *view_id);
            push_size(out, *size);
        }
        Request::DestroyCommandBuffer { route_id } => {
            push_u16(out, REQ_TAG_DESTROY_COMMAND_BUFFER);
            push_i32(out, *route_id);
        }
    }
}

fn encode_reply(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Initialized(ok) => {
            push_u16(out, REPLY_TAG_INITIALIZED);
            out.push(*ok as u8);
        }
        Reply::State(state) => {
            push_u16(out, REPLY_TAG_STATE);
            push_state(out, state);
        }
        Reply::TransferBufferId(id) => {
            push_u16(out, REPLY_TAG_TRANSFER_BUFFER_ID);
            push_i32(out, *id);
        }
        Reply::TransferBuffer { handle, size } => {
            push_u16(out, REPLY_TAG_TRANSFER_BUFFER);
            push_u32(out, *handle);
            push_u32(out, *size);
        }
        Reply::Ack => push_u16(out, REPLY_TAG_ACK),
        Reply::RouteCreated(route_id) => {
            push_u16(out, REPLY_TAG_ROUTE_CREATED);
            push_i32(out, *route_id);
        }
    }
}

fn encode_event(evt: &Event, out: &mut Vec<u8>) {
    match evt {
        Event::UpdateState(state) => {
            push_u16(out, EVT_TAG_UPDATE_STATE);
            push_state(out, state);
        }
        Event::SwapBuffers => push_u16(out, EVT_TAG_SWAP_BUFFERS),
        Event::ContextLost => push_u16(out, EVT_TAG_CONTEXT_LOST),
    }
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, DecodeError> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(DecodeError::OversizedMessage);
    }
    let mut r = Reader::new(bytes);
    let msg = match r.read_u16()? {
        MSG_TAG_REQUEST => Message::Request {
            route_id: r.read_i32()?,
            request_id: r.read_u32()?,
            body: decode_request(&mut r)?,
        },
        MSG_TAG_POST => Message::Post {
            route_id: r.read_i32()?,
            body: decode_request(&mut r)?,
        },
        MSG_TAG_REPLY => Message::Reply {
            route_id: r.read_i32()?,
            request_id: r.read_u32()?,
            body: decode_reply(&mut r)?,
        },
        MSG_TAG_EVENT => Message::Event {
            route_id: r.read_i32()?,
            body: decode_event(&mut r)?,
        },
        tag => return Err(DecodeError::UnknownTag(tag)),
    };
    if r.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(r.remaining()));
    }
    Ok(msg)
}

fn decode_request(r: &mut Reader<'_>) -> Result<Request, DecodeError> {
    Ok(match r.read_u16()? {
        REQ_TAG_INITIALIZE => Request::Initialize {
            ring_handle: r.read_u32()?,
            size: r.read_u32()?,
        },
        REQ_TAG_GET_STATE => Request::GetState,
        REQ_TAG_ASYNC_GET_STATE => Request::AsyncGetState,
        REQ_TAG_FLUSH => Request::Flush {
            put_offset: r.read_i32()?,
            last_known_get: r.read_i32()?,
        },
        REQ_TAG_ASYNC_FLUSH => Request::AsyncFlush {
            put_offset: r.read_i32()?,
        },
        REQ_TAG_CREATE_TRANSFER_BUFFER => Request::CreateTransferBuffer {
            size: r.read_u32()?,
            id_request: r.read_i32()?,
        },
        REQ_TAG_REGISTER_TRANSFER_BUFFER => Request::RegisterTransferBuffer {
            handle: r.read_u32()?,
            size: r.read_u32()?,
            id_request: r.read_i32()?,
        },
        REQ_TAG_DESTROY_TRANSFER_BUFFER => Request::DestroyTransferBuffer { id: r.read_i32()? },
        REQ_TAG_GET_TRANSFER_BUFFER => Request::GetTransferBuffer { id: r.read_i32()? },
        REQ_TAG_RESIZE_OFFSCREEN => Request::ResizeOffscreenFrameBuffer {
            size: r.read_size()?,
        },
        REQ_TAG_SET_WINDOW_SIZE => Request::SetWindowSize {
            size: r.read_size()?,
        },
        REQ_TAG_CREATE_OFFSCREEN => Request::CreateOffscreenCommandBuffer {
            size: r.read_size()?,
            parent_route_id: r.read_i32()?,
            parent_texture_id: r.read_u32()?,
        },
        REQ_TAG_CREATE_VIEW => Request::CreateViewCommandBuffer {
            view_id: r.read_i32()?,
            size: r.read_size()?,
        },
        REQ_TAG_DESTROY_COMMAND_BUFFER => Request::DestroyCommandBuffer {
            route_id: r.read_i32()?,
        },
        tag => return Err(DecodeError::UnknownTag(tag)),
    })
}

fn decode_reply(r: &mut Reader<'_>) -> Result<Reply, DecodeError> {
    Ok(match r.read_u16()? {
        REPLY_TAG_INITIALIZED => Reply::Initialized(r.read_bool()?),
        REPLY_TAG_STATE => Reply::State(r.read_state()?),
        REPLY_TAG_TRANSFER_BUFFER_ID => Reply::TransferBufferId(r.read_i32()?),
        REPLY_TAG_TRANSFER_BUFFER => Reply::TransferBuffer {
            handle: r.read_u32()?,
            size: r.read_u32()?,
        },
        REPLY_TAG_ACK => Reply::Ack,
        REPLY_TAG_ROUTE_CREATED => Reply::RouteCreated(r.read_i32()?),
        tag => return Err(DecodeError::UnknownTag(tag)),
    })
}

fn decode_event(r: &mut Reader<'_>) -> Result<Event, DecodeError> {
    Ok(match r.read_u16()? {
        EVT_TAG_UPDATE_STATE => Event::UpdateState(r.read_state()?),
        EVT_TAG_SWAP_BUFFERS => Event::SwapBuffers,
        EVT_TAG_CONTEXT_LOST => Event::ContextLost,
        tag => return Err(DecodeError::UnknownTag(tag)),
    })
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_size(out: &mut Vec<u8>, size: Size) {
    push_u32(out, size.width);
    push_u32(out, size.height);
}

fn push_state(out: &mut Vec<u8>, state: &State) {
    push_i32(out, state.size);
    push_i32(out, state.get_offset);
    push_i32(out, state.put_offset);
    push_i32(out, state.token);
    push_u32(out, state.error as u32);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_bytes(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidEnum),
        }
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    fn read_size(&mut self) -> Result<Size, DecodeError> {
        Ok(Size {
            width: self.read_u32()?,
            height: self.read_u32()?,
        })
    }

    fn read_state(&mut self) -> Result<State, DecodeError> {
        Ok(State {
            size: self.read_i32()?,
            get_offset: self.read_i32()?,
            put_offset: self.read_i32()?,
            token: self.read_i32()?,
            error: CbError::from_u32(self.read_u32()?).ok_or(DecodeError::InvalidEnum)?,
        })
    }
}
