//! EPP request document construction
//!
//! All outgoing documents are built through quick-xml's writer so that zone
//! names, credentials and key material are escaped by the serializer rather
//! than spliced into strings.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesText, Event};

use crate::diff::UpdatePlan;
use crate::keyset::{KeyRecord, ZoneName};

pub const EPP_NS: &str = "urn:ietf:params:xml:ns:epp-1.0";
pub const DOMAIN_NS: &str = "urn:ietf:params:xml:ns:domain-1.0";
pub const SECDNS_NS: &str = "urn:ietf:params:xml:ns:secDNS-1.1";

const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const EPP_SCHEMA_LOCATION: &str = "urn:ietf:params:xml:ns:epp-1.0 epp-1.0.xsd";

type XmlResult<T> = Result<T, quick_xml::Error>;

fn text_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> XmlResult<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(value))?;
    Ok(())
}

/// Wrap `body` in the standard document shell: XML declaration plus the
/// `<epp>` root with its namespace declarations.
fn epp_document<F>(body: F) -> XmlResult<Vec<u8>>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> XmlResult<()>,
{
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))?;
    writer
        .create_element("epp")
        .with_attribute(("xmlns", EPP_NS))
        .with_attribute(("xmlns:xsi", XSI_NS))
        .with_attribute(("xsi:schemaLocation", EPP_SCHEMA_LOCATION))
        .write_inner_content(body)?;
    Ok(writer.into_inner())
}

/// `<hello/>`, used for the greeting exchange and as a keepalive
pub fn hello() -> XmlResult<Vec<u8>> {
    epp_document(|w| {
        w.create_element("hello").write_empty()?;
        Ok(())
    })
}

/// `<login>` with credentials and the declared object/extension services
pub fn login(
    account: &str,
    password: &str,
    object_uris: &[String],
    extension_uris: &[String],
) -> XmlResult<Vec<u8>> {
    epp_document(|w| {
        w.create_element("command").write_inner_content(|w| {
            w.create_element("login").write_inner_content(|w| {
                text_element(w, "clID", account)?;
                text_element(w, "pw", password)?;
                w.create_element("options").write_inner_content(|w| {
                    text_element(w, "version", "1.0")?;
                    text_element(w, "lang", "en")
                })?;
                w.create_element("svcs").write_inner_content(|w| {
                    for uri in object_uris {
                        text_element(w, "objURI", uri)?;
                    }
                    if !extension_uris.is_empty() {
                        w.create_element("svcExtension").write_inner_content(|w| {
                            for uri in extension_uris {
                                text_element(w, "extURI", uri)?;
                            }
                            Ok::<(), quick_xml::Error>(())
                        })?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok::<(), quick_xml::Error>(())
        })?;
        Ok(())
    })
}

pub fn logout() -> XmlResult<Vec<u8>> {
    epp_document(|w| {
        w.create_element("command").write_inner_content(|w| {
            w.create_element("logout").write_empty()?;
            Ok::<(), quick_xml::Error>(())
        })?;
        Ok(())
    })
}

/// `<domain:info>` with all hosts, used to read the current key set
pub fn domain_info(zone: &ZoneName) -> XmlResult<Vec<u8>> {
    epp_document(|w| {
        w.create_element("command").write_inner_content(|w| {
            w.create_element("info").write_inner_content(|w| {
                w.create_element("domain:info")
                    .with_attribute(("xmlns:domain", DOMAIN_NS))
                    .write_inner_content(|w| {
                        w.create_element("domain:name")
                            .with_attribute(("hosts", "all"))
                            .write_text_content(BytesText::new(&zone.as_registry_str()))?;
                        Ok::<(), quick_xml::Error>(())
                    })?;
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok::<(), quick_xml::Error>(())
        })?;
        Ok(())
    })
}

fn key_data<W: std::io::Write>(writer: &mut Writer<W>, key: &KeyRecord) -> XmlResult<()> {
    writer
        .create_element("secDNS:keyData")
        .write_inner_content(|w| {
            text_element(w, "secDNS:flags", &key.flags.to_string())?;
            text_element(w, "secDNS:protocol", &key.protocol.to_string())?;
            text_element(w, "secDNS:alg", &key.algorithm.to_string())?;
            text_element(w, "secDNS:pubKey", &key.public_key_b64())
        })?;
    Ok(())
}

/// `<domain:update>` carrying a secure-delegation extension with the plan's
/// removals and additions. Either block is omitted when empty; callers must
/// not invoke this with an entirely empty plan.
pub fn domain_update(zone: &ZoneName, plan: &UpdatePlan<KeyRecord>) -> XmlResult<Vec<u8>> {
    epp_document(|w| {
        w.create_element("command").write_inner_content(|w| {
            w.create_element("update").write_inner_content(|w| {
                w.create_element("domain:update")
                    .with_attribute(("xmlns:domain", DOMAIN_NS))
                    .write_inner_content(|w| {
                        text_element(w, "domain:name", &zone.as_registry_str())
                    })?;
                Ok::<(), quick_xml::Error>(())
            })?;
            w.create_element("extension").write_inner_content(|w| {
                w.create_element("secDNS:update")
                    .with_attribute(("xmlns:secDNS", SECDNS_NS))
                    .write_inner_content(|w| {
                        if !plan.to_remove.is_empty() {
                            w.create_element("secDNS:rem").write_inner_content(|w| {
                                for key in &plan.to_remove {
                                    key_data(w, key)?;
                                }
                                Ok::<(), quick_xml::Error>(())
                            })?;
                        }
                        if !plan.to_add.is_empty() {
                            w.create_element("secDNS:add").write_inner_content(|w| {
                                for key in &plan.to_add {
                                    key_data(w, key)?;
                                }
                                Ok::<(), quick_xml::Error>(())
                            })?;
                        }
                        Ok::<(), quick_xml::Error>(())
                    })?;
                Ok::<(), quick_xml::Error>(())
            })?;
            Ok::<(), quick_xml::Error>(())
        })?;
        Ok(())
    })
}
