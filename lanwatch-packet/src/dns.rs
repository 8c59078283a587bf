//! DNS message decoding
//!
//! Turns a UDP/53 payload into the list of names it asks about or answers
//! for. `dns-parser` reads the header and expands compressed names; the
//! question and answer sections are walked here so that record types the
//! parser does not know (HTTPS, SVCB, RRSIG, ...) become `Other` instead of
//! failing the whole message. The number of records taken from one message
//! is capped.

use chrono::{DateTime, Utc};
use dns_parser::{Header, Name};
use lanwatch_core::{DeviceRef, DnsQueryEvent, DnsRecordType, Error, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::trace;

/// Upper bound on records turned into lookups per message
pub const MAX_RECORDS: usize = 64;

const HEADER_LEN: usize = 12;

const TYPE_A: u16 = 1;
const TYPE_CNAME: u16 = 5;
const TYPE_AAAA: u16 = 28;

/// One name seen in a DNS message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsLookup {
    /// Lowercased, trailing root dot removed
    pub name: String,
    pub record_type: DnsRecordType,
}

impl DnsLookup {
    /// Attach provenance and time
    pub fn into_event(
        self,
        device: DeviceRef,
        source_ip: IpAddr,
        timestamp: DateTime<Utc>,
    ) -> DnsQueryEvent {
        DnsQueryEvent {
            device,
            source_ip,
            queried_name: self.name,
            record_type: self.record_type,
            timestamp,
        }
    }
}

/// Strip the trailing root-label dot and lowercase
pub fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn record_type(rtype: u16) -> DnsRecordType {
    match rtype {
        TYPE_A => DnsRecordType::A,
        TYPE_AAAA => DnsRecordType::Aaaa,
        TYPE_CNAME => DnsRecordType::Cname,
        _ => DnsRecordType::Other,
    }
}

fn truncated(what: &str) -> Error {
    Error::parsing(format!("DNS: message truncated in {}", what))
}

/// Cursor over the sections following the header
struct Sections<'a> {
    message: &'a [u8],
    pos: usize,
}

impl<'a> Sections<'a> {
    fn new(message: &'a [u8]) -> Self {
        Self {
            message,
            pos: HEADER_LEN,
        }
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self
            .message
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| truncated("record header"))?;
        self.pos += 2;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        if self.pos + len > self.message.len() {
            return Err(truncated("record data"));
        }
        self.pos += len;
        Ok(())
    }

    /// Expanded owner name at the cursor; the cursor moves past its
    /// encoded form (labels up to the root byte or the first pointer)
    fn name(&mut self) -> Result<String> {
        let rest = self.message.get(self.pos..).unwrap_or_default();
        let name = Name::scan(rest, self.message)
            .map_err(|e| Error::parsing(format!("DNS: {}", e)))?;

        loop {
            let len = *self.message.get(self.pos).ok_or_else(|| truncated("name"))?;
            match len & 0xC0 {
                0xC0 => return self.skip(2).map(|()| name.to_string()),
                0x00 if len == 0 => {
                    self.pos += 1;
                    return Ok(name.to_string());
                }
                0x00 => self.skip(1 + len as usize)?,
                _ => return Err(Error::parsing("DNS: unsupported label type")),
            }
        }
    }

    /// Question: name, type, class
    fn question(&mut self) -> Result<(String, u16)> {
        let name = self.name()?;
        let qtype = self.u16()?;
        self.u16()?;
        Ok((name, qtype))
    }

    /// Resource record: name, type, class, ttl, rdata
    fn record(&mut self) -> Result<(String, u16)> {
        let name = self.name()?;
        let rtype = self.u16()?;
        self.skip(2 + 4)?;
        let rdlength = self.u16()?;
        self.skip(rdlength as usize)?;
        Ok((name, rtype))
    }
}

/// Decoder for DNS payloads captured on the wire
#[derive(Debug, Clone)]
pub struct DnsDecoder {
    max_records: usize,
}

impl Default for DnsDecoder {
    fn default() -> Self {
        Self {
            max_records: MAX_RECORDS,
        }
    }
}

impl DnsDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_records(max_records: usize) -> Self {
        Self { max_records }
    }

    /// Decode a payload into lookups.
    ///
    /// Questions come first, then answers. An answer for the same name and
    /// type as a question in the same message is not repeated, so a
    /// response carrying its own question yields one lookup per name.
    /// Malformed input is an [`Error::PacketParsing`]; callers log it and
    /// carry on.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<DnsLookup>> {
        let header =
            Header::parse(payload).map_err(|e| Error::parsing(format!("DNS: {}", e)))?;
        let records = header.questions as usize + header.answers as usize;

        let mut sections = Sections::new(payload);
        let mut seen = HashSet::new();
        let mut lookups = Vec::new();
        for index in 0..records.min(self.max_records) {
            let (raw, rtype) = if index < header.questions as usize {
                sections.question()?
            } else {
                sections.record()?
            };

            let name = normalize_name(&raw);
            if name.is_empty() {
                continue;
            }
            let lookup = DnsLookup {
                name,
                record_type: record_type(rtype),
            };
            if seen.insert(lookup.clone()) {
                lookups.push(lookup);
            }
        }

        trace!(
            id = header.id,
            response = !header.query,
            lookups = lookups.len(),
            "Decoded DNS message"
        );

        Ok(lookups)
    }
}
