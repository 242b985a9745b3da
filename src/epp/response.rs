//! EPP response parsing and result classification
//!
//! A decoded frame is parsed once into an [`EppResponse`]; classification
//! then works on the parsed structure. Malformed XML and a missing result
//! element are protocol errors, a well-formed non-success result is a
//! registry rejection carrying the registry's own code and message plus any
//! vendor-extension sub-conditions.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::RegistryError;
use crate::keyset::KeyRecord;

/// Result code family: anything starting with '1' is a success.
const SUCCESS_FAMILY: char = '1';

#[derive(Debug, Clone)]
pub struct EppResult {
    pub code: String,
    pub message: String,
}

/// One sub-condition from a vendor result extension block
#[derive(Debug, Clone)]
pub struct ExtCondition {
    pub code: Option<String>,
    pub message: String,
}

/// The parts of an EPP document this client acts on. One structure covers
/// greetings, command responses and info data; absent parts stay empty.
#[derive(Debug, Clone, Default)]
pub struct EppResponse {
    /// `svID` from a greeting
    pub server_id: Option<String>,
    /// Top-level command result
    pub result: Option<EppResult>,
    /// Vendor extension sub-conditions, in document order
    pub conditions: Vec<ExtCondition>,
    /// `keyData` entries from a domain-info secure-delegation block,
    /// unfiltered (SEP selection is the backend's concern)
    pub key_data: Vec<KeyRecord>,
}

#[derive(Default)]
struct PendingKey {
    flags: Option<u16>,
    protocol: Option<u8>,
    algorithm: Option<u8>,
    public_key: Option<String>,
}

fn protocol_err(detail: impl std::fmt::Display) -> RegistryError {
    RegistryError::Protocol(detail.to_string())
}

fn local_name(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn code_attribute(start: &BytesStart) -> Result<Option<String>, RegistryError> {
    match start.try_get_attribute("code") {
        Ok(Some(attr)) => {
            let value = attr.unescape_value().map_err(protocol_err)?;
            Ok(Some(value.into_owned()))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(protocol_err(e)),
    }
}

impl EppResponse {
    /// Parse one response document. Any XML-level fault is a
    /// `ProtocolError`; this function never classifies success or failure.
    pub fn parse(xml: &[u8]) -> Result<Self, RegistryError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut response = EppResponse::default();
        let mut stack: Vec<String> = Vec::new();
        let mut pending_key: Option<PendingKey> = None;
        let mut pending_condition: Option<ExtCondition> = None;
        let mut buf = Vec::new();
        let mut saw_root = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    saw_root = true;
                    match name.as_str() {
                        "result" if response.result.is_none() => {
                            let code = code_attribute(&e)?.ok_or_else(|| {
                                protocol_err("result element without code attribute")
                            })?;
                            response.result = Some(EppResult {
                                code,
                                message: String::new(),
                            });
                        }
                        "keyData" => pending_key = Some(PendingKey::default()),
                        "msg" if stack.iter().any(|n| n == "extension") => {
                            pending_condition = Some(ExtCondition {
                                code: code_attribute(&e)?,
                                message: String::new(),
                            });
                        }
                        _ => {}
                    }
                    stack.push(name);
                }
                Ok(Event::Empty(e)) => {
                    saw_root = true;
                    if local_name(&e) == "result" && response.result.is_none() {
                        let code = code_attribute(&e)?.ok_or_else(|| {
                            protocol_err("result element without code attribute")
                        })?;
                        response.result = Some(EppResult {
                            code,
                            message: String::new(),
                        });
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(protocol_err)?.into_owned();
                    let here = stack.last().map(String::as_str).unwrap_or("");
                    let in_extension = stack.iter().any(|n| n == "extension");
                    match here {
                        "svID" => response.server_id = Some(text),
                        "msg" if pending_condition.is_some() => {
                            if let Some(cond) = pending_condition.as_mut() {
                                cond.message = text;
                            }
                        }
                        "msg" if !in_extension => {
                            if let Some(result) = response.result.as_mut() {
                                result.message = text;
                            }
                        }
                        "flags" if pending_key.is_some() => {
                            let value =
                                text.parse().map_err(|_| protocol_err("bad keyData flags"))?;
                            if let Some(key) = pending_key.as_mut() {
                                key.flags = Some(value);
                            }
                        }
                        "protocol" if pending_key.is_some() => {
                            let value = text
                                .parse()
                                .map_err(|_| protocol_err("bad keyData protocol"))?;
                            if let Some(key) = pending_key.as_mut() {
                                key.protocol = Some(value);
                            }
                        }
                        "alg" if pending_key.is_some() => {
                            let value =
                                text.parse().map_err(|_| protocol_err("bad keyData alg"))?;
                            if let Some(key) = pending_key.as_mut() {
                                key.algorithm = Some(value);
                            }
                        }
                        "pubKey" if pending_key.is_some() => {
                            if let Some(key) = pending_key.as_mut() {
                                key.public_key = Some(text);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(_)) => {
                    let closed = stack.pop().unwrap_or_default();
                    match closed.as_str() {
                        "keyData" => {
                            if let Some(pending) = pending_key.take() {
                                response.key_data.push(pending.finish()?);
                            }
                        }
                        "msg" => {
                            if let Some(cond) = pending_condition.take() {
                                response.conditions.push(cond);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(protocol_err(format!("XML parse error: {e}"))),
            }
            buf.clear();
        }

        if !saw_root {
            return Err(protocol_err("empty response document"));
        }
        Ok(response)
    }

    /// Greeting accessor; a greeting without a server identity is malformed.
    pub fn greeting_server_id(&self) -> Result<&str, RegistryError> {
        self.server_id
            .as_deref()
            .ok_or_else(|| protocol_err("greeting carries no svID"))
    }

    /// Classify this response. Success is a result code in the 1xxx family,
    /// or an exact match on `accept_alt` (used e.g. to treat "already logged
    /// out" as a clean logout). Everything else is a rejection carrying the
    /// primary code/message and all extension sub-conditions; a response
    /// without a result element is a protocol fault, not a rejection.
    pub fn require_ok(
        &self,
        zone: &str,
        operation: &str,
        accept_alt: Option<&str>,
    ) -> Result<(), RegistryError> {
        let result = self.result.as_ref().ok_or_else(|| {
            protocol_err(format!("response to {operation} has no result element"))
        })?;

        if result.code.starts_with(SUCCESS_FAMILY) || accept_alt == Some(result.code.as_str()) {
            return Ok(());
        }

        let mut detail = String::new();
        for cond in &self.conditions {
            detail.push_str(" -- ");
            if let Some(code) = &cond.code {
                detail.push_str(&format!("{}.{}", result.code, code));
                detail.push_str(": ");
            }
            detail.push_str(&cond.message);
        }

        Err(RegistryError::Rejected {
            zone: zone.to_string(),
            operation: operation.to_string(),
            code: result.code.clone(),
            message: result.message.clone(),
            detail,
        })
    }
}

impl PendingKey {
    fn finish(self) -> Result<KeyRecord, RegistryError> {
        let flags = self.flags.ok_or_else(|| protocol_err("keyData missing flags"))?;
        let protocol = self
            .protocol
            .ok_or_else(|| protocol_err("keyData missing protocol"))?;
        let algorithm = self.algorithm.ok_or_else(|| protocol_err("keyData missing alg"))?;
        let public_key = self
            .public_key
            .ok_or_else(|| protocol_err("keyData missing pubKey"))?;
        KeyRecord::from_presentation(flags, protocol, algorithm, &public_key)
            .map_err(|e| protocol_err(format!("bad keyData pubKey: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPP_OPEN: &str =
        r#"<?xml version="1.0" encoding="UTF-8"?><epp xmlns="urn:ietf:params:xml:ns:epp-1.0">"#;

    fn result_doc(code: &str, msg: &str) -> String {
        format!(
            r#"{EPP_OPEN}<response><result code="{code}"><msg>{msg}</msg></result></response></epp>"#
        )
    }

    #[test]
    fn test_success_family_is_ok() {
        let resp = EppResponse::parse(result_doc("1000", "Command completed").as_bytes()).unwrap();
        assert!(resp.require_ok("example.com", "login", None).is_ok());
    }

    #[test]
    fn test_failure_code_is_rejected() {
        let resp = EppResponse::parse(result_doc("2303", "Object does not exist").as_bytes())
            .unwrap();
        match resp.require_ok("example.com", "domain info", None) {
            Err(RegistryError::Rejected { code, message, .. }) => {
                assert_eq!(code, "2303");
                assert_eq!(message, "Object does not exist");
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn test_alternate_code_is_accepted() {
        let resp = EppResponse::parse(result_doc("1500", "Already ended").as_bytes()).unwrap();
        assert!(resp.require_ok("example.com", "logout", Some("1500")).is_ok());
        // but only an exact match
        let resp = EppResponse::parse(result_doc("2500", "Session limit").as_bytes()).unwrap();
        assert!(resp.require_ok("example.com", "logout", Some("1500")).is_err());
    }

    #[test]
    fn test_missing_result_is_protocol_error() {
        let xml = format!("{EPP_OPEN}<response></response></epp>");
        let resp = EppResponse::parse(xml.as_bytes()).unwrap();
        match resp.require_ok("example.com", "update", None) {
            Err(RegistryError::Protocol(_)) => {}
            other => panic!("Expected Protocol, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_xml_is_protocol_error() {
        match EppResponse::parse(b"this is not XML <at all") {
            Err(RegistryError::Protocol(_)) => {}
            other => panic!("Expected Protocol, got {other:?}"),
        }
    }

    #[test]
    fn test_greeting_server_id() {
        let xml = format!(
            "{EPP_OPEN}<greeting><svID>registry.example</svID><svDate>2016-01-01T00:00:00Z</svDate></greeting></epp>"
        );
        let resp = EppResponse::parse(xml.as_bytes()).unwrap();
        assert_eq!(resp.greeting_server_id().unwrap(), "registry.example");
    }

    #[test]
    fn test_extension_conditions_collected() {
        let xml = format!(
            r#"{EPP_OPEN}<response><result code="2308"><msg>Data management policy violation</msg></result><extension><ext xmlns="http://rxsd.domain-registry.nl/sidn-ext-epp-1.0"><response><msg code="C0129">Key already present</msg><msg code="C0130">Pending zone action</msg></response></ext></extension></response></epp>"#
        );
        let resp = EppResponse::parse(xml.as_bytes()).unwrap();
        assert_eq!(resp.conditions.len(), 2);
        match resp.require_ok("example.com", "domain update", None) {
            Err(RegistryError::Rejected { code, detail, .. }) => {
                assert_eq!(code, "2308");
                assert!(detail.contains("2308.C0129: Key already present"));
                assert!(detail.contains("2308.C0130: Pending zone action"));
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn test_info_key_data_parsed() {
        let key_b64 = crate::keyset::KeyRecord::new(257, 3, 8, vec![9; 16]).public_key_b64();
        let xml = format!(
            r#"{EPP_OPEN}<response><result code="1000"><msg>OK</msg></result><extension><infData xmlns="urn:ietf:params:xml:ns:secDNS-1.1"><keyData><flags>257</flags><protocol>3</protocol><alg>8</alg><pubKey>{key_b64}</pubKey></keyData><keyData><flags>256</flags><protocol>3</protocol><alg>8</alg><pubKey>{key_b64}</pubKey></keyData></infData></extension></response></epp>"#
        );
        let resp = EppResponse::parse(xml.as_bytes()).unwrap();
        assert_eq!(resp.key_data.len(), 2);
        assert_eq!(resp.key_data[0].flags, 257);
        assert_eq!(resp.key_data[1].flags, 256);
        assert_eq!(resp.key_data[0].public_key, vec![9; 16]);
    }

    #[test]
    fn test_incomplete_key_data_is_protocol_error() {
        let xml = format!(
            r#"{EPP_OPEN}<response><result code="1000"/><extension><infData><keyData><flags>257</flags></keyData></infData></extension></response></epp>"#
        );
        match EppResponse::parse(xml.as_bytes()) {
            Err(RegistryError::Protocol(_)) => {}
            other => panic!("Expected Protocol, got {other:?}"),
        }
    }
}
