//! OPEN message optional-parameter / capability codec (RFC 5492, RFC 2858,
//! RFC 6793). spec.md §4.3 describes the capability set as a flat map;
//! here it's an enum-keyed struct rather than a `HashMap<String, _>`, the
//! way `Cach30verfl0w-zephyr-route/src/bgp/error.rs` keys BGP error codes
//! with enums instead of strings.
//!
//! The wire vectors this module is tested against come from
//! `test/unit/test_bgp_message.py`'s `test_open_message_parses_*` and
//! `test_open_message_packs_capabilities` cases.

use std::io::{Cursor, Read};

use crate::error::{BgpError, BgpResult};

const OPTIONAL_PARAMETER_CAPABILITY: u8 = 2;

const CAPABILITY_MULTIPROTOCOL: u8 = 1;
const CAPABILITY_ROUTE_REFRESH: u8 = 2;
const CAPABILITY_FOUR_OCTET_AS: u8 = 65;

const AFI_IPV4: u16 = 1;
const AFI_IPV6: u16 = 2;
const SAFI_UNICAST: u8 = 1;

/// An (AFI, SAFI) pair as carried by the multiprotocol capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfiSafi {
    Ipv4Unicast,
    Ipv6Unicast,
    Other(u16, u8),
}

impl AfiSafi {
    fn from_wire(afi: u16, safi: u8) -> Self {
        match (afi, safi) {
            (AFI_IPV4, SAFI_UNICAST) => AfiSafi::Ipv4Unicast,
            (AFI_IPV6, SAFI_UNICAST) => AfiSafi::Ipv6Unicast,
            (afi, safi) => AfiSafi::Other(afi, safi),
        }
    }

    fn to_wire(self) -> (u16, u8) {
        match self {
            AfiSafi::Ipv4Unicast => (AFI_IPV4, SAFI_UNICAST),
            AfiSafi::Ipv6Unicast => (AFI_IPV6, SAFI_UNICAST),
            AfiSafi::Other(afi, safi) => (afi, safi),
        }
    }
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AfiSafi::Ipv4Unicast => write!(f, "ipv4-unicast"),
            AfiSafi::Ipv6Unicast => write!(f, "ipv6-unicast"),
            AfiSafi::Other(afi, safi) => write!(f, "afi={afi}/safi={safi}"),
        }
    }
}

/// The negotiated (or offered) capability set of one OPEN message.
///
/// Unknown capability codes are logged and skipped on parse (spec.md
/// §4.3/§7); this set only ever holds capabilities it understands, so
/// packing it back out is a no-op for anything it didn't recognise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub multiprotocol: Vec<AfiSafi>,
    pub route_refresh: bool,
    pub four_octet_asn: Option<u32>,
}

impl CapabilitySet {
    pub fn supports(&self, afi_safi: AfiSafi) -> bool {
        self.multiprotocol.contains(&afi_safi)
    }

    pub fn four_octet_asn_negotiated(&self) -> bool {
        self.four_octet_asn.is_some()
    }

    /// Parse the optional-parameters block that follows an OPEN message's
    /// fixed header. Each parameter must be a capability parameter (type 2);
    /// anything else is a protocol violation this speaker doesn't support.
    pub fn parse(serialised: &[u8]) -> BgpResult<Self> {
        let mut set = CapabilitySet::default();
        let mut cursor = Cursor::new(serialised);

        loop {
            let mut header = [0u8; 2];
            match cursor.read_exact(&mut header) {
                Ok(()) => {}
                Err(_) => break,
            }
            let (parameter_type, parameter_length) = (header[0], header[1] as usize);
            if parameter_type != OPTIONAL_PARAMETER_CAPABILITY {
                return Err(BgpError::protocol(format!(
                    "OPEN: unsupported optional parameter type {parameter_type}"
                )));
            }
            let mut body = vec![0u8; parameter_length];
            cursor
                .read_exact(&mut body)
                .map_err(|_| BgpError::protocol("OPEN: truncated optional parameter"))?;
            set.parse_capabilities(&body)?;
        }

        Ok(set)
    }

    fn parse_capabilities(&mut self, body: &[u8]) -> BgpResult<()> {
        let mut cursor = Cursor::new(body);
        loop {
            let mut header = [0u8; 2];
            match cursor.read_exact(&mut header) {
                Ok(()) => {}
                Err(_) => break,
            }
            let (code, length) = (header[0], header[1] as usize);
            let mut value = vec![0u8; length];
            cursor
                .read_exact(&mut value)
                .map_err(|_| BgpError::protocol("OPEN: truncated capability"))?;

            match code {
                CAPABILITY_MULTIPROTOCOL if value.len() == 4 => {
                    let afi = u16::from_be_bytes([value[0], value[1]]);
                    let safi = value[3];
                    self.multiprotocol.push(AfiSafi::from_wire(afi, safi));
                }
                CAPABILITY_ROUTE_REFRESH => self.route_refresh = true,
                CAPABILITY_FOUR_OCTET_AS if value.len() == 4 => {
                    self.four_octet_asn =
                        Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]));
                }
                code => {
                    tracing::warn!(capability_code = code, "did not recognise capability code");
                }
            }
        }
        Ok(())
    }

    /// Encode this capability set as a single optional parameter. Each
    /// `{code, len, body}` record is built independently, then the records
    /// are sorted lexicographically by their serialized bytes before being
    /// concatenated, per spec.md §4.3's "sorted ... for deterministic
    /// output" — not emitted in field declaration order.
    pub fn pack(&self) -> Vec<u8> {
        let mut records = Vec::new();

        for afi_safi in &self.multiprotocol {
            let (afi, safi) = afi_safi.to_wire();
            let mut record = vec![CAPABILITY_MULTIPROTOCOL, 4];
            record.extend_from_slice(&afi.to_be_bytes());
            record.push(0);
            record.push(safi);
            records.push(record);
        }

        if self.route_refresh {
            records.push(vec![CAPABILITY_ROUTE_REFRESH, 0]);
        }

        if let Some(asn) = self.four_octet_asn {
            let mut record = vec![CAPABILITY_FOUR_OCTET_AS, 4];
            record.extend_from_slice(&asn.to_be_bytes());
            records.push(record);
        }

        records.sort();

        let capabilities: Vec<u8> = records.concat();
        if capabilities.is_empty() {
            return Vec::new();
        }

        let mut parameter = Vec::with_capacity(2 + capabilities.len());
        parameter.push(OPTIONAL_PARAMETER_CAPABILITY);
        parameter.push(capabilities.len() as u8);
        parameter.extend_from_slice(&capabilities);
        parameter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn parses_ipv4_multiprotocol() {
        let set = CapabilitySet::parse(&bytes("0206010400010001")).unwrap();
        assert_eq!(set.multiprotocol, vec![AfiSafi::Ipv4Unicast]);
    }

    #[test]
    fn parses_ipv6_multiprotocol() {
        let set = CapabilitySet::parse(&bytes("0206010400020001")).unwrap();
        assert_eq!(set.multiprotocol, vec![AfiSafi::Ipv6Unicast]);
    }

    #[test]
    fn parses_fourbyteas_alongside_multiprotocol() {
        let set = CapabilitySet::parse(&bytes("020c01040001000141040000fdeb")).unwrap();
        assert_eq!(set.multiprotocol, vec![AfiSafi::Ipv4Unicast]);
        assert_eq!(set.four_octet_asn, Some(65003));
    }

    #[test]
    fn parses_route_refresh() {
        let set = CapabilitySet::parse(&bytes("02080104000200010200")).unwrap();
        assert_eq!(set.multiprotocol, vec![AfiSafi::Ipv6Unicast]);
        assert!(set.route_refresh);
    }

    #[test]
    fn packs_capabilities_in_canonical_order() {
        let set = CapabilitySet {
            multiprotocol: vec![AfiSafi::Ipv4Unicast, AfiSafi::Ipv6Unicast],
            route_refresh: true,
            four_octet_asn: Some(65003),
        };
        let expected = bytes("0214010400010001010400020001020041040000fdeb");
        assert_eq!(set.pack(), expected);
    }

    #[test]
    fn packs_in_byte_sorted_order_regardless_of_parse_order() {
        // Holding ipv6-unicast ahead of ipv4-unicast (e.g. because that's
        // the order they were parsed in) must not change the packed byte
        // order: capability records are sorted by their own bytes, not by
        // field/insertion order.
        let set = CapabilitySet {
            multiprotocol: vec![AfiSafi::Ipv6Unicast, AfiSafi::Ipv4Unicast],
            route_refresh: true,
            four_octet_asn: Some(65003),
        };
        let expected = bytes("0214010400010001010400020001020041040000fdeb");
        assert_eq!(set.pack(), expected);
    }

    #[test]
    fn unknown_capability_codes_are_logged_and_dropped_not_round_tripped() {
        // code 0x63 is unassigned; it must not survive a parse/pack round trip.
        let mut combined = bytes("0206010400010001" /* ipv4-unicast */);
        combined.extend(bytes("02046302ffff" /* unknown code 0x63, 2-byte body */));
        let set = CapabilitySet::parse(&combined).unwrap();
        assert_eq!(set.multiprotocol, vec![AfiSafi::Ipv4Unicast]);
        assert_eq!(set.pack(), bytes("0206010400010001"));
    }

    #[test]
    fn parses_back_to_back_single_capability_optional_parameters() {
        // Multiple optional parameters, each carrying exactly one
        // capability, merge into the same set the way a single
        // multi-capability parameter would.
        let raw = bytes("0206010400010001" /* ipv4-unicast */);
        let mut combined = raw.clone();
        combined.extend(bytes("02060104000200010200" /* ipv6-unicast, route refresh */));
        let set = CapabilitySet::parse(&combined).unwrap();
        assert_eq!(
            set.multiprotocol,
            vec![AfiSafi::Ipv4Unicast, AfiSafi::Ipv6Unicast]
        );
        assert!(set.route_refresh);
    }
}
