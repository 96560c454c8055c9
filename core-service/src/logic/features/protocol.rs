//! Protocol Identifier - numeric L7 code for the application classifier
//!
//! Codes follow the nDPI protocol ids the training flows were labelled with.
//! Unknown protocols map to 0.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::record::{FlowRecord, FIELD_PROTO, FIELD_SERVICE};

/// Code used when neither `service` nor `proto` is recognised
pub const UNKNOWN_PROTOCOL: f32 = 0.0;

static SERVICE_CODES: Lazy<HashMap<&'static str, f32>> = Lazy::new(|| {
    HashMap::from([
        ("ftp", 1.0),
        ("ftp-data", 1.0),
        ("pop3", 2.0),
        ("smtp", 3.0),
        ("imap", 4.0),
        ("dns", 5.0),
        ("http", 7.0),
        ("mdns", 8.0),
        ("ntp", 9.0),
        ("netbios-ns", 10.0),
        ("netbios-ssn", 10.0),
        ("nfs", 11.0),
        ("ssdp", 12.0),
        ("bgp", 13.0),
        ("snmp", 14.0),
        ("smb", 16.0),
        ("syslog", 17.0),
        ("dhcp", 18.0),
        ("postgresql", 19.0),
        ("mysql", 20.0),
        ("telnet", 77.0),
        ("rdp", 88.0),
        ("ssl", 91.0),
        ("tls", 91.0),
        ("ssh", 92.0),
        ("sip", 100.0),
        ("krb", 111.0),
        ("krb_tcp", 111.0),
        ("ldap", 112.0),
        ("quic", 188.0),
    ])
});

/// Bare transport, for flows whose service Zeek could not identify
static TRANSPORT_CODES: Lazy<HashMap<&'static str, f32>> = Lazy::new(|| {
    HashMap::from([
        ("icmp", 81.0),
        ("igmp", 82.0),
        ("tcp", 253.0),
        ("udp", 254.0),
    ])
});

/// Protocol code for a flow: `service` first, then `proto`, else unknown
///
/// Zeek may report several services (`"ssl,quic"`); the first known one wins.
pub fn protocol_code(record: &FlowRecord) -> f32 {
    if let Some(service) = record.str_field(FIELD_SERVICE) {
        let known = service
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .find_map(|s| SERVICE_CODES.get(s.as_str()).copied());
        if let Some(code) = known {
            return code;
        }
    }

    record
        .str_field(FIELD_PROTO)
        .and_then(|p| TRANSPORT_CODES.get(p.to_ascii_lowercase().as_str()).copied())
        .unwrap_or(UNKNOWN_PROTOCOL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> FlowRecord {
        FlowRecord::parse(json).unwrap()
    }

    #[test]
    fn test_service_lookup() {
        assert_eq!(protocol_code(&record(r#"{"service":"http","proto":"tcp"}"#)), 7.0);
        assert_eq!(protocol_code(&record(r#"{"service":"DNS"}"#)), 5.0);
    }

    #[test]
    fn test_multi_service_takes_first_known() {
        assert_eq!(protocol_code(&record(r#"{"service":"gibberish,ssl"}"#)), 91.0);
    }

    #[test]
    fn test_transport_fallback() {
        assert_eq!(protocol_code(&record(r#"{"proto":"icmp"}"#)), 81.0);
        assert_eq!(protocol_code(&record(r#"{"proto":"tcp"}"#)), 253.0);
        assert_eq!(protocol_code(&record(r#"{"proto":"UDP","service":"unknown-svc"}"#)), 254.0);
        assert_eq!(protocol_code(&record(r#"{"proto":"sctp"}"#)), UNKNOWN_PROTOCOL);
        assert_eq!(protocol_code(&record("{}")), UNKNOWN_PROTOCOL);
    }
}
