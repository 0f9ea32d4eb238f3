//! BGP-4 message parsing and packing: OPEN, UPDATE, NOTIFICATION,
//! KEEPALIVE, and the path attribute codec that backs UPDATE.
//!
//! Grounded on `beka/bgp_message.py`'s struct layouts and dict-keyed
//! attribute tables, extended with the capability-aware OPEN parsing and
//! the AS4_PATH / four-octet-ASN handling that `test/unit/test_bgp_message.py`
//! exercises but the on-disk `bgp_message.py` snapshot never finished
//! (its `pack_as_path` is a literal `# TODO actually do this`). Every hex
//! vector below is taken from that test file.

use std::fmt;
use std::io::{Cursor, Read};
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::error::{BgpError, BgpResult};
use crate::ip::{prefix_byte_length, Ipv4Prefix, Ipv6Prefix};

pub const MARKER: [u8; 16] = [0xFF; 16];
pub const HEADER_LENGTH: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Open,
    Update,
    Notification,
    Keepalive,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Open => 1,
            MessageType::Update => 2,
            MessageType::Notification => 3,
            MessageType::Keepalive => 4,
        }
    }

    pub fn from_code(code: u8) -> BgpResult<Self> {
        match code {
            1 => Ok(MessageType::Open),
            2 => Ok(MessageType::Update),
            3 => Ok(MessageType::Notification),
            4 => Ok(MessageType::Keepalive),
            other => Err(BgpError::protocol(format!("unknown message type {other}"))),
        }
    }
}

/// One parsed BGP message, with the 19-byte header already stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    Keepalive,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Open(_) => MessageType::Open,
            Message::Update(_) => MessageType::Update,
            Message::Notification(_) => MessageType::Notification,
            Message::Keepalive => MessageType::Keepalive,
        }
    }

    /// Parse a message body, given the type byte read from the header.
    pub fn parse(message_type: MessageType, body: &[u8]) -> BgpResult<Self> {
        Ok(match message_type {
            MessageType::Open => Message::Open(OpenMessage::parse(body)?),
            MessageType::Update => Message::Update(UpdateMessage::parse(body, false)?),
            MessageType::Notification => Message::Notification(NotificationMessage::parse(body)?),
            MessageType::Keepalive => Message::Keepalive,
        })
    }

    /// Parse an UPDATE body whose AS_PATH attribute should be read as
    /// four-octet ASNs because the four-octet-ASN capability was
    /// negotiated with this peer.
    pub fn parse_update_with_capabilities(body: &[u8], four_octet_asn: bool) -> BgpResult<Self> {
        Ok(Message::Update(UpdateMessage::parse(body, four_octet_asn)?))
    }

    /// Pack this message into a full wire frame, including the 19-byte
    /// header.
    pub fn pack(&self) -> Vec<u8> {
        let body = match self {
            Message::Open(open) => open.pack(),
            Message::Update(update) => update.pack(),
            Message::Notification(notification) => notification.pack(),
            Message::Keepalive => Vec::new(),
        };
        frame(self.message_type(), body)
    }
}

/// Wrap a body in the 19-byte header: marker, total length, type byte.
pub fn frame(message_type: MessageType, body: Vec<u8>) -> Vec<u8> {
    let mut framed = Vec::with_capacity(HEADER_LENGTH + body.len());
    framed.extend_from_slice(&MARKER);
    framed.extend_from_slice(&((HEADER_LENGTH + body.len()) as u16).to_be_bytes());
    framed.push(message_type.code());
    framed.extend_from_slice(&body);
    framed
}

// ---------------------------------------------------------------------
// OPEN
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct OpenMessage {
    pub version: u8,
    pub peer_as: u16,
    pub hold_time: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: CapabilitySet,
}

impl OpenMessage {
    pub fn new(
        peer_as: u16,
        hold_time: u16,
        identifier: Ipv4Addr,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            version: 4,
            peer_as,
            hold_time,
            identifier,
            capabilities,
        }
    }

    pub fn parse(body: &[u8]) -> BgpResult<Self> {
        if body.len() < 10 {
            return Err(BgpError::protocol("OPEN: message too short"));
        }
        let version = body[0];
        let peer_as = u16::from_be_bytes([body[1], body[2]]);
        let hold_time = u16::from_be_bytes([body[3], body[4]]);
        let identifier = Ipv4Addr::new(body[5], body[6], body[7], body[8]);
        let optional_parameters_length = body[9] as usize;
        let optional_parameters = body
            .get(10..10 + optional_parameters_length)
            .ok_or_else(|| BgpError::protocol("OPEN: truncated optional parameters"))?;
        let capabilities = CapabilitySet::parse(optional_parameters)?;
        Ok(Self {
            version,
            peer_as,
            hold_time,
            identifier,
            capabilities,
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let optional_parameters = self.capabilities.pack();
        let mut body = Vec::with_capacity(10 + optional_parameters.len());
        body.push(self.version);
        body.extend_from_slice(&self.peer_as.to_be_bytes());
        body.extend_from_slice(&self.hold_time.to_be_bytes());
        body.extend_from_slice(&self.identifier.octets());
        body.push(optional_parameters.len() as u8);
        body.extend_from_slice(&optional_parameters);
        body
    }
}

// ---------------------------------------------------------------------
// Path attributes
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

impl Origin {
    fn from_wire(value: u8) -> BgpResult<Self> {
        match value {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            other => Err(BgpError::protocol(format!("unknown ORIGIN code {other}"))),
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            Origin::Igp => 0,
            Origin::Egp => 1,
            Origin::Incomplete => 2,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Igp => write!(f, "IGP"),
            Origin::Egp => write!(f, "EGP"),
            Origin::Incomplete => write!(f, "INCOMPLETE"),
        }
    }
}

impl std::str::FromStr for Origin {
    type Err = BgpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IGP" => Ok(Origin::Igp),
            "EGP" => Ok(Origin::Egp),
            "INCOMPLETE" => Ok(Origin::Incomplete),
            other => Err(BgpError::protocol(format!("unknown ORIGIN value {other}"))),
        }
    }
}

const AS_SET_CODE: u8 = 1;
const AS_SEQUENCE_CODE: u8 = 2;

/// `MP_REACH_NLRI`, carrying the IPv6 routes and their next hops.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MpReachNlri {
    pub next_hop: Vec<Ipv6Addr>,
    pub nlri: Vec<Ipv6Prefix>,
}

/// `MP_UNREACH_NLRI`, carrying withdrawn IPv6 routes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MpUnreachNlri {
    pub withdrawn_routes: Vec<Ipv6Prefix>,
}

/// The subset of BGP path attributes this speaker understands.
///
/// Packed in a fixed canonical order (origin, as_path, as4_path, next_hop,
/// mp_reach_nlri, mp_unreach_nlri) rather than sorted by attribute number
/// or insertion order — that's the order every observed UPDATE on the
/// wire uses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathAttributes {
    pub origin: Option<Origin>,
    pub as_path: Option<String>,
    pub as4_path: Option<String>,
    pub next_hop: Option<Ipv4Addr>,
    pub mp_reach_nlri: Option<MpReachNlri>,
    pub mp_unreach_nlri: Option<MpUnreachNlri>,
}

fn parse_as_path_value(value: &[u8], four_octet_asn: bool) -> BgpResult<String> {
    let mut cursor = Cursor::new(value);
    let mut as_numbers = Vec::new();
    let entry_width = if four_octet_asn { 4 } else { 2 };

    loop {
        let mut header = [0u8; 2];
        match cursor.read_exact(&mut header) {
            Ok(()) => {}
            Err(_) => break,
        }
        let (type_code, count) = (header[0], header[1] as usize);
        if type_code == AS_SET_CODE {
            tracing::warn!("received AS_PATH with AS_SET, treating as AS_SEQUENCE");
        } else if type_code != AS_SEQUENCE_CODE {
            return Err(BgpError::protocol(format!(
                "AS_PATH: unknown segment type {type_code}"
            )));
        }
        for _ in 0..count {
            let mut buf = vec![0u8; entry_width];
            cursor
                .read_exact(&mut buf)
                .map_err(|_| BgpError::protocol("AS_PATH: truncated segment"))?;
            let asn = if four_octet_asn {
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
            } else {
                u16::from_be_bytes([buf[0], buf[1]]) as u32
            };
            as_numbers.push(asn.to_string());
        }
    }

    Ok(as_numbers.join(" "))
}

fn pack_as_path_value(as_path: &str, four_octet_asn: bool) -> BgpResult<Vec<u8>> {
    let asns: Vec<u32> = as_path
        .split_whitespace()
        .map(|n| {
            n.parse::<u32>()
                .map_err(|_| BgpError::protocol(format!("AS_PATH: invalid AS number {n}")))
        })
        .collect::<BgpResult<_>>()?;

    if asns.is_empty() {
        return Ok(Vec::new());
    }

    let mut packed = Vec::with_capacity(2 + asns.len() * if four_octet_asn { 4 } else { 2 });
    packed.push(AS_SEQUENCE_CODE);
    packed.push(asns.len() as u8);
    for asn in asns {
        if four_octet_asn {
            packed.extend_from_slice(&asn.to_be_bytes());
        } else {
            let truncated: u16 = asn.try_into().map_err(|_| {
                BgpError::protocol(format!("AS_PATH: {asn} does not fit in two octets"))
            })?;
            packed.extend_from_slice(&truncated.to_be_bytes());
        }
    }
    Ok(packed)
}

const IP6_AFI: u16 = 2;
const UNICAST_SAFI: u8 = 1;

fn parse_nlri6(cursor: &mut Cursor<&[u8]>) -> BgpResult<Vec<Ipv6Prefix>> {
    let mut prefixes = Vec::new();
    loop {
        let mut length_byte = [0u8; 1];
        match cursor.read_exact(&mut length_byte) {
            Ok(()) => {}
            Err(_) => break,
        }
        let length = length_byte[0];
        let mut packed = vec![0u8; prefix_byte_length(length)];
        cursor
            .read_exact(&mut packed)
            .map_err(|_| BgpError::protocol("NLRI: truncated prefix"))?;
        prefixes.push(Ipv6Prefix::from_wire_bytes(&packed, length)?);
    }
    Ok(prefixes)
}

fn pack_nlri6(prefixes: &[Ipv6Prefix]) -> Vec<u8> {
    let mut packed = Vec::new();
    for prefix in prefixes {
        packed.push(prefix.length);
        packed.extend_from_slice(&prefix.wire_bytes());
    }
    packed
}

fn parse_mp_reach_nlri(value: &[u8]) -> BgpResult<MpReachNlri> {
    let mut cursor = Cursor::new(value);
    let mut header = [0u8; 4];
    cursor
        .read_exact(&mut header)
        .map_err(|_| BgpError::protocol("MP_REACH_NLRI: truncated header"))?;
    let afi = u16::from_be_bytes([header[0], header[1]]);
    let safi = header[2];
    let next_hop_length = header[3] as usize;
    if afi != IP6_AFI {
        return Err(BgpError::protocol(format!(
            "MP_REACH_NLRI: unsupported AFI {afi}"
        )));
    }
    if safi != UNICAST_SAFI {
        return Err(BgpError::protocol(format!(
            "MP_REACH_NLRI: unsupported SAFI {safi}"
        )));
    }
    if next_hop_length % 16 != 0 {
        return Err(BgpError::protocol(format!(
            "MP_REACH_NLRI: unsupported next hop length {next_hop_length}"
        )));
    }

    let mut next_hop = Vec::with_capacity(next_hop_length / 16);
    for _ in 0..next_hop_length / 16 {
        let mut addr = [0u8; 16];
        cursor
            .read_exact(&mut addr)
            .map_err(|_| BgpError::protocol("MP_REACH_NLRI: truncated next hop"))?;
        next_hop.push(Ipv6Addr::from(addr));
    }

    let mut reserved = [0u8; 1];
    cursor
        .read_exact(&mut reserved)
        .map_err(|_| BgpError::protocol("MP_REACH_NLRI: missing reserved byte"))?;

    let nlri = parse_nlri6(&mut cursor)?;
    Ok(MpReachNlri { next_hop, nlri })
}

fn pack_mp_reach_nlri(attr: &MpReachNlri) -> Vec<u8> {
    let mut packed = Vec::new();
    packed.extend_from_slice(&IP6_AFI.to_be_bytes());
    packed.push(UNICAST_SAFI);
    packed.push((16 * attr.next_hop.len()) as u8);
    for addr in &attr.next_hop {
        packed.extend_from_slice(&addr.octets());
    }
    packed.push(0);
    packed.extend_from_slice(&pack_nlri6(&attr.nlri));
    packed
}

fn parse_mp_unreach_nlri(value: &[u8]) -> BgpResult<MpUnreachNlri> {
    let mut cursor = Cursor::new(value);
    let mut header = [0u8; 3];
    cursor
        .read_exact(&mut header)
        .map_err(|_| BgpError::protocol("MP_UNREACH_NLRI: truncated header"))?;
    let afi = u16::from_be_bytes([header[0], header[1]]);
    let safi = header[2];
    if afi != IP6_AFI {
        return Err(BgpError::protocol(format!(
            "MP_UNREACH_NLRI: unsupported AFI {afi}"
        )));
    }
    if safi != UNICAST_SAFI {
        return Err(BgpError::protocol(format!(
            "MP_UNREACH_NLRI: unsupported SAFI {safi}"
        )));
    }
    let withdrawn_routes = parse_nlri6(&mut cursor)?;
    Ok(MpUnreachNlri { withdrawn_routes })
}

fn pack_mp_unreach_nlri(attr: &MpUnreachNlri) -> Vec<u8> {
    let mut packed = Vec::new();
    packed.extend_from_slice(&IP6_AFI.to_be_bytes());
    packed.push(UNICAST_SAFI);
    packed.extend_from_slice(&pack_nlri6(&attr.withdrawn_routes));
    packed
}

const ATTR_ORIGIN: u8 = 1;
const ATTR_AS_PATH: u8 = 2;
const ATTR_NEXT_HOP: u8 = 3;
const ATTR_MP_REACH_NLRI: u8 = 14;
const ATTR_MP_UNREACH_NLRI: u8 = 15;
const ATTR_AS4_PATH: u8 = 17;

const FLAG_WELL_KNOWN_TRANSITIVE: u8 = 0x40;
const FLAG_OPTIONAL_TRANSITIVE: u8 = 0xC0;
const FLAG_OPTIONAL_NON_TRANSITIVE: u8 = 0x80;

impl PathAttributes {
    fn parse(serialised: &[u8], four_octet_asn: bool) -> BgpResult<Self> {
        let mut attrs = PathAttributes::default();
        let mut cursor = Cursor::new(serialised);

        loop {
            let mut header = [0u8; 3];
            match cursor.read_exact(&mut header) {
                Ok(()) => {}
                Err(_) => break,
            }
            let (flags, type_code, mut length) = (header[0], header[1], header[2] as usize);
            if flags & 0x10 != 0 {
                // extended length: the real length is a big-endian u16
                // following the 1-byte length we already read.
                let mut extra = [0u8; 1];
                cursor
                    .read_exact(&mut extra)
                    .map_err(|_| BgpError::protocol("attribute: truncated extended length"))?;
                length = ((length as u16) << 8 | extra[0] as u16) as usize;
            }
            let mut value = vec![0u8; length];
            cursor
                .read_exact(&mut value)
                .map_err(|_| BgpError::protocol("attribute: truncated value"))?;

            match type_code {
                ATTR_ORIGIN => {
                    attrs.origin = Some(Origin::from_wire(
                        *value
                            .first()
                            .ok_or_else(|| BgpError::protocol("ORIGIN: empty value"))?,
                    )?)
                }
                ATTR_AS_PATH => attrs.as_path = Some(parse_as_path_value(&value, four_octet_asn)?),
                ATTR_AS4_PATH => attrs.as4_path = Some(parse_as_path_value(&value, true)?),
                ATTR_NEXT_HOP => {
                    if value.len() != 4 {
                        return Err(BgpError::protocol("NEXT_HOP: expected 4 bytes"));
                    }
                    attrs.next_hop = Some(Ipv4Addr::new(value[0], value[1], value[2], value[3]));
                }
                ATTR_MP_REACH_NLRI => {
                    attrs.mp_reach_nlri = Some(parse_mp_reach_nlri(&value)?);
                }
                ATTR_MP_UNREACH_NLRI => {
                    attrs.mp_unreach_nlri = Some(parse_mp_unreach_nlri(&value)?);
                }
                other => {
                    tracing::warn!(type_code = other, "did not recognise path attribute type");
                }
            }
        }

        Ok(attrs)
    }

    fn pack(&self, four_octet_asn: bool) -> BgpResult<Vec<u8>> {
        let mut packed = Vec::new();

        if let Some(origin) = self.origin {
            push_attribute(
                &mut packed,
                FLAG_WELL_KNOWN_TRANSITIVE,
                ATTR_ORIGIN,
                &[origin.to_wire()],
            );
        }
        if let Some(as_path) = &self.as_path {
            let value = pack_as_path_value(as_path, four_octet_asn)?;
            push_attribute(&mut packed, FLAG_WELL_KNOWN_TRANSITIVE, ATTR_AS_PATH, &value);
        }
        if let Some(as4_path) = &self.as4_path {
            let value = pack_as_path_value(as4_path, true)?;
            push_attribute(&mut packed, FLAG_OPTIONAL_TRANSITIVE, ATTR_AS4_PATH, &value);
        }
        if let Some(next_hop) = self.next_hop {
            push_attribute(
                &mut packed,
                FLAG_WELL_KNOWN_TRANSITIVE,
                ATTR_NEXT_HOP,
                &next_hop.octets(),
            );
        }
        if let Some(mp_reach_nlri) = &self.mp_reach_nlri {
            let value = pack_mp_reach_nlri(mp_reach_nlri);
            push_attribute(
                &mut packed,
                FLAG_OPTIONAL_NON_TRANSITIVE,
                ATTR_MP_REACH_NLRI,
                &value,
            );
        }
        if let Some(mp_unreach_nlri) = &self.mp_unreach_nlri {
            let value = pack_mp_unreach_nlri(mp_unreach_nlri);
            push_attribute(
                &mut packed,
                FLAG_OPTIONAL_NON_TRANSITIVE,
                ATTR_MP_UNREACH_NLRI,
                &value,
            );
        }

        Ok(packed)
    }
}

fn push_attribute(out: &mut Vec<u8>, flags: u8, type_code: u8, value: &[u8]) {
    out.push(flags);
    out.push(type_code);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}

// ---------------------------------------------------------------------
// UPDATE
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateMessage {
    pub withdrawn_routes: Vec<Ipv4Prefix>,
    pub path_attributes: PathAttributes,
    pub nlri: Vec<Ipv4Prefix>,
}

fn parse_nlri4(serialised: &[u8]) -> BgpResult<Vec<Ipv4Prefix>> {
    let mut cursor = Cursor::new(serialised);
    let mut prefixes = Vec::new();
    loop {
        let mut length_byte = [0u8; 1];
        match cursor.read_exact(&mut length_byte) {
            Ok(()) => {}
            Err(_) => break,
        }
        let length = length_byte[0];
        let mut packed = vec![0u8; prefix_byte_length(length)];
        cursor
            .read_exact(&mut packed)
            .map_err(|_| BgpError::protocol("NLRI: truncated prefix"))?;
        prefixes.push(Ipv4Prefix::from_wire_bytes(&packed, length)?);
    }
    Ok(prefixes)
}

fn pack_nlri4(prefixes: &[Ipv4Prefix]) -> Vec<u8> {
    let mut packed = Vec::new();
    for prefix in prefixes {
        packed.push(prefix.length);
        packed.extend_from_slice(&prefix.wire_bytes());
    }
    packed
}

impl UpdateMessage {
    pub fn new(
        withdrawn_routes: Vec<Ipv4Prefix>,
        path_attributes: PathAttributes,
        nlri: Vec<Ipv4Prefix>,
    ) -> Self {
        Self {
            withdrawn_routes,
            path_attributes,
            nlri,
        }
    }

    pub fn parse(body: &[u8], four_octet_asn: bool) -> BgpResult<Self> {
        let mut cursor = Cursor::new(body);

        let mut length_buf = [0u8; 2];
        cursor
            .read_exact(&mut length_buf)
            .map_err(|_| BgpError::protocol("UPDATE: truncated withdrawn routes length"))?;
        let withdrawn_routes_length = u16::from_be_bytes(length_buf) as usize;
        let mut withdrawn_routes_bytes = vec![0u8; withdrawn_routes_length];
        cursor
            .read_exact(&mut withdrawn_routes_bytes)
            .map_err(|_| BgpError::protocol("UPDATE: truncated withdrawn routes"))?;
        let withdrawn_routes = parse_nlri4(&withdrawn_routes_bytes)?;

        cursor
            .read_exact(&mut length_buf)
            .map_err(|_| BgpError::protocol("UPDATE: truncated path attribute length"))?;
        let path_attribute_length = u16::from_be_bytes(length_buf) as usize;
        let mut path_attribute_bytes = vec![0u8; path_attribute_length];
        cursor
            .read_exact(&mut path_attribute_bytes)
            .map_err(|_| BgpError::protocol("UPDATE: truncated path attributes"))?;
        let path_attributes = PathAttributes::parse(&path_attribute_bytes, four_octet_asn)?;

        let mut remaining = Vec::new();
        cursor
            .read_to_end(&mut remaining)
            .map_err(|_| BgpError::protocol("UPDATE: failed to read NLRI"))?;
        let nlri = parse_nlri4(&remaining)?;

        Ok(Self {
            withdrawn_routes,
            path_attributes,
            nlri,
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        self.pack_with_capabilities(false)
            .expect("pack() is only fallible when as_path contains a non-numeric token")
    }

    /// Pack with the AS_PATH width negotiated for this peer.
    pub fn pack_with_capabilities(&self, four_octet_asn: bool) -> BgpResult<Vec<u8>> {
        let packed_withdrawn_routes = pack_nlri4(&self.withdrawn_routes);
        let packed_path_attributes = self.path_attributes.pack(four_octet_asn)?;
        let packed_nlri = pack_nlri4(&self.nlri);

        let mut packed = Vec::new();
        packed.extend_from_slice(&(packed_withdrawn_routes.len() as u16).to_be_bytes());
        packed.extend_from_slice(&packed_withdrawn_routes);
        packed.extend_from_slice(&(packed_path_attributes.len() as u16).to_be_bytes());
        packed.extend_from_slice(&packed_path_attributes);
        packed.extend_from_slice(&packed_nlri);
        Ok(packed)
    }
}

// ---------------------------------------------------------------------
// NOTIFICATION
// ---------------------------------------------------------------------

/// The well-known NOTIFICATION error codes (RFC 4271 §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationErrorCode {
    MessageHeader,
    OpenMessage,
    UpdateMessage,
    HoldTimerExpired,
    FiniteStateMachine,
    Cease,
    Unknown(u8),
}

impl From<u8> for NotificationErrorCode {
    fn from(value: u8) -> Self {
        match value {
            1 => NotificationErrorCode::MessageHeader,
            2 => NotificationErrorCode::OpenMessage,
            3 => NotificationErrorCode::UpdateMessage,
            4 => NotificationErrorCode::HoldTimerExpired,
            5 => NotificationErrorCode::FiniteStateMachine,
            6 => NotificationErrorCode::Cease,
            other => NotificationErrorCode::Unknown(other),
        }
    }
}

impl From<NotificationErrorCode> for u8 {
    fn from(value: NotificationErrorCode) -> Self {
        match value {
            NotificationErrorCode::MessageHeader => 1,
            NotificationErrorCode::OpenMessage => 2,
            NotificationErrorCode::UpdateMessage => 3,
            NotificationErrorCode::HoldTimerExpired => 4,
            NotificationErrorCode::FiniteStateMachine => 5,
            NotificationErrorCode::Cease => 6,
            NotificationErrorCode::Unknown(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub error_code: NotificationErrorCode,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(error_code: NotificationErrorCode, error_subcode: u8, data: Vec<u8>) -> Self {
        Self {
            error_code,
            error_subcode,
            data,
        }
    }

    pub fn parse(body: &[u8]) -> BgpResult<Self> {
        if body.len() < 2 {
            return Err(BgpError::protocol("NOTIFICATION: message too short"));
        }
        Ok(Self {
            error_code: NotificationErrorCode::from(body[0]),
            error_subcode: body[1],
            data: body[2..].to_vec(),
        })
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(2 + self.data.len());
        packed.push(self.error_code.into());
        packed.push(self.error_subcode);
        packed.extend_from_slice(&self.data);
        packed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::AfiSafi;

    fn bytes(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn open_message_parses_ipv4_multiprotocol() {
        let body = bytes("04fe0900b4c0a8000f080206010400010001");
        let open = OpenMessage::parse(&body).unwrap();
        assert_eq!(open.version, 4);
        assert_eq!(open.peer_as, 65033);
        assert_eq!(open.hold_time, 180);
        assert_eq!(open.identifier, Ipv4Addr::new(192, 168, 0, 15));
        assert_eq!(open.capabilities.multiprotocol, vec![AfiSafi::Ipv4Unicast]);
    }

    #[test]
    fn open_message_parses_four_octet_asn() {
        let body = bytes("04fe0900b4c0a8000f0e020c01040001000141040000fdeb");
        let open = OpenMessage::parse(&body).unwrap();
        assert_eq!(open.capabilities.four_octet_asn, Some(65003));
    }

    #[test]
    fn open_message_packs() {
        let open = OpenMessage::new(
            65033,
            180,
            Ipv4Addr::new(192, 168, 0, 15),
            CapabilitySet {
                multiprotocol: vec![AfiSafi::Ipv4Unicast],
                ..Default::default()
            },
        );
        let expected = bytes("04fe0900b4c0a8000f080206010400010001");
        assert_eq!(open.pack(), expected);
    }

    #[test]
    fn keepalive_packs_as_empty_body() {
        assert!(Message::Keepalive.pack()[19..].is_empty());
    }

    #[test]
    fn notification_round_trips() {
        let body = bytes("0202feb0");
        let notification = NotificationMessage::parse(&body).unwrap();
        assert_eq!(
            notification.error_code,
            NotificationErrorCode::OpenMessage
        );
        assert_eq!(notification.error_subcode, 2);
        assert_eq!(notification.data, vec![0xfe, 0xb0]);
        assert_eq!(notification.pack(), body);
    }

    #[test]
    fn update_parses_new_ipv4_route() {
        let body = bytes("0000000e40010101400200400304c0a80021080a");
        let update = UpdateMessage::parse(&body, false).unwrap();
        assert_eq!(update.nlri, vec!["10.0.0.0/8".parse().unwrap()]);
        assert_eq!(
            update.path_attributes.next_hop,
            Some(Ipv4Addr::new(192, 168, 0, 33))
        );
        assert_eq!(update.path_attributes.origin, Some(Origin::Egp));
        assert_eq!(update.path_attributes.as_path.as_deref(), Some(""));
    }

    #[test]
    fn update_packs_new_ipv4_routes() {
        let path_attributes = PathAttributes {
            next_hop: Some(Ipv4Addr::new(192, 168, 0, 33)),
            origin: Some(Origin::Egp),
            as_path: Some(String::new()),
            ..Default::default()
        };
        let update = UpdateMessage::new(
            Vec::new(),
            path_attributes,
            vec!["10.0.0.0/8".parse().unwrap(), "192.168.64.0/23".parse().unwrap()],
        );
        let expected = bytes("0000000e40010101400200400304c0a80021080a17c0a840");
        assert_eq!(update.pack(), expected);
    }

    #[test]
    fn update_parses_as4_path_alongside_truncated_as_path() {
        let body = bytes(
            "000000274001010040020802035ba0fe08fdebc0110e020300bc614e0000fe080000fdeb400304ac1900042009090909",
        );
        let update = UpdateMessage::parse(&body, false).unwrap();
        assert_eq!(update.nlri, vec!["9.9.9.9/32".parse().unwrap()]);
        assert_eq!(
            update.path_attributes.next_hop,
            Some(Ipv4Addr::new(172, 25, 0, 4))
        );
        assert_eq!(update.path_attributes.origin, Some(Origin::Igp));
        assert_eq!(
            update.path_attributes.as_path.as_deref(),
            Some("23456 65032 65003")
        );
        assert_eq!(
            update.path_attributes.as4_path.as_deref(),
            Some("12345678 65032 65003")
        );
    }

    #[test]
    fn update_packs_as4_path_alongside_truncated_as_path() {
        let path_attributes = PathAttributes {
            next_hop: Some(Ipv4Addr::new(172, 25, 0, 4)),
            origin: Some(Origin::Igp),
            as_path: Some("23456 65032 65003".to_string()),
            as4_path: Some("12345678 65032 65003".to_string()),
            ..Default::default()
        };
        let update = UpdateMessage::new(Vec::new(), path_attributes, vec!["9.9.9.9/32".parse().unwrap()]);
        let expected = bytes(
            "000000274001010040020802035ba0fe08fdebc0110e020300bc614e0000fe080000fdeb400304ac1900042009090909",
        );
        assert_eq!(update.pack_with_capabilities(false).unwrap(), expected);
    }

    #[test]
    fn update_parses_as_path_as_four_octet_when_negotiated() {
        let body = bytes(
            "0000001c4001010040020e020300bc614e0000fe080001b2e5400304ac1900042009090909",
        );
        let update = UpdateMessage::parse(&body, true).unwrap();
        assert_eq!(
            update.path_attributes.as_path.as_deref(),
            Some("12345678 65032 111333")
        );
        assert!(update.path_attributes.as4_path.is_none());
    }

    #[test]
    fn update_packs_as_path_as_four_octet_when_negotiated() {
        let path_attributes = PathAttributes {
            next_hop: Some(Ipv4Addr::new(172, 25, 0, 4)),
            origin: Some(Origin::Igp),
            as_path: Some("12345678 65032 111333".to_string()),
            ..Default::default()
        };
        let update = UpdateMessage::new(Vec::new(), path_attributes, vec!["9.9.9.9/32".parse().unwrap()]);
        let expected = bytes(
            "0000001c4001010040020e020300bc614e0000fe080001b2e5400304ac1900042009090909",
        );
        assert_eq!(update.pack_with_capabilities(true).unwrap(), expected);
    }

    #[test]
    fn update_parses_withdrawn_routes() {
        let body = bytes("0004180a01010000");
        let update = UpdateMessage::parse(&body, false).unwrap();
        assert_eq!(update.withdrawn_routes, vec!["10.1.1.0/24".parse().unwrap()]);
    }

    #[test]
    fn update_packs_withdrawn_routes() {
        let update = UpdateMessage::new(
            vec!["10.1.1.0/24".parse().unwrap()],
            PathAttributes::default(),
            Vec::new(),
        );
        assert_eq!(update.pack(), bytes("0004180a01010000"));
    }

    #[test]
    fn update_parses_ipv6_mp_reach_nlri() {
        let body = bytes(
            "0000004b400101004002040201fdeb800e3d0002012020010db80001000000000242ac110002fe800000000000000042acfffe110002007f20010db40000000000000000000000002f20010db30000",
        );
        let update = UpdateMessage::parse(&body, false).unwrap();
        assert_eq!(update.path_attributes.origin, Some(Origin::Igp));
        let mp_reach = update.path_attributes.mp_reach_nlri.unwrap();
        assert_eq!(
            mp_reach.next_hop[0],
            "2001:db8:1::242:ac11:2".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(
            mp_reach.next_hop[1],
            "fe80::42:acff:fe11:2".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(mp_reach.nlri[0], "2001:db4::/127".parse().unwrap());
        assert_eq!(mp_reach.nlri[1], "2001:db3::/47".parse().unwrap());
    }

    #[test]
    fn update_packs_ipv6_mp_reach_nlri() {
        let path_attributes = PathAttributes {
            origin: Some(Origin::Igp),
            as_path: Some(String::new()),
            mp_reach_nlri: Some(MpReachNlri {
                next_hop: vec![
                    "2001:db8:1::242:ac11:2".parse().unwrap(),
                    "fe80::42:acff:fe11:2".parse().unwrap(),
                ],
                nlri: vec![
                    "2001:db4::/127".parse().unwrap(),
                    "2001:db3::/47".parse().unwrap(),
                ],
            }),
            ..Default::default()
        };
        let update = UpdateMessage::new(Vec::new(), path_attributes, Vec::new());
        let expected = bytes(
            "0000004740010100400200800e3d00020120\
             20010db80001000000000242ac110002\
             fe800000000000000042acfffe110002\
             007f20010db40000000000000000000000\
             002f20010db30000",
        );
        assert_eq!(update.pack(), expected);
    }

    #[test]
    fn update_parses_ipv6_mp_unreach_nlri() {
        let body = bytes(
            "0000002d800f2a0002017f20010db4000000000000000000000000\
             3020010db10000\
             3320010db20000\
             002f20010db30000",
        );
        let update = UpdateMessage::parse(&body, false).unwrap();
        let mp_unreach = update.path_attributes.mp_unreach_nlri.unwrap();
        assert_eq!(
            mp_unreach.withdrawn_routes,
            vec![
                "2001:db4::/127".parse().unwrap(),
                "2001:db1::/48".parse().unwrap(),
                "2001:db2::/51".parse().unwrap(),
                "2001:db3::/47".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn update_packs_ipv6_mp_unreach_nlri() {
        let path_attributes = PathAttributes {
            mp_unreach_nlri: Some(MpUnreachNlri {
                withdrawn_routes: vec![
                    "2001:db4::/127".parse().unwrap(),
                    "2001:db1::/48".parse().unwrap(),
                    "2001:db2::/51".parse().unwrap(),
                    "2001:db3::/47".parse().unwrap(),
                ],
            }),
            ..Default::default()
        };
        let update = UpdateMessage::new(Vec::new(), path_attributes, Vec::new());
        let expected = bytes(
            "0000002d800f2a0002017f20010db4000000000000000000000000\
             3020010db10000\
             3320010db20000\
             002f20010db30000",
        );
        assert_eq!(update.pack(), expected);
    }
}
