// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! XML dialect of the registry documents.
//!
//! Documents are read into a small element tree first and mapped onto the model from there.
//! The dialect differs from JSON in a few places:
//! - A port carries its flag as an attribute: `<port enabled="true">8080</port>`.
//! - Instance and data center metadata hold one element per key, with the value as text.
//! - Lists are plain repeated elements, so a single element needs no special casing.

use std::{borrow::Cow, collections::HashMap, str::FromStr, sync::Arc};

use quick_xml::{
    Reader, Writer,
    events::{BytesEnd, BytesStart, BytesText, Event},
};
use serde_json::Value;

use super::{AMAZON_INFO_CLASS, CodecError, MY_DATA_CENTER_INFO_CLASS, amazon_metadata};
use crate::model::{
    AMAZON, Application, Applications, DataCenterInfo, Instance, InstanceMetadata, LeaseInfo,
    MY_OWN, Port, StatusType,
};

/// Decodes an `<applications>` document.
pub fn decode_applications(body: &[u8]) -> Result<Applications, CodecError> {
    let root = parse_root(body, "applications")?;
    Ok(Applications {
        versions_delta: root.number("versions__delta")?,
        apps_hashcode: root.text_of("apps__hashcode"),
        applications: root
            .children_named("application")
            .map(application)
            .collect::<Result<_, _>>()?,
    })
}

/// Decodes an `<application>` document.
pub fn decode_application(body: &[u8]) -> Result<Application, CodecError> {
    application(&parse_root(body, "application")?)
}

/// Decodes an `<instance>` document.
pub fn decode_instance(body: &[u8]) -> Result<Instance, CodecError> {
    instance(&parse_root(body, "instance")?)
}

/// Encodes an instance as an `<instance>` document.
pub fn encode_instance(instance: &Instance) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::new(Vec::new());
    write_instance(&mut w, instance)?;
    Ok(w.into_inner())
}

/// Encodes an application as an `<application>` document.
pub fn encode_application(application: &Application) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::new(Vec::new());
    write_application(&mut w, application)?;
    Ok(w.into_inner())
}

/// Encodes an `<applications>` document.
pub fn encode_applications(applications: &Applications) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::new(Vec::new());
    element(&mut w, "applications", &[], |w| {
        text_element(w, "versions__delta", &applications.versions_delta.to_string())?;
        text_element(w, "apps__hashcode", &applications.apps_hashcode)?;
        for application in &applications.applications {
            write_application(w, application)?;
        }
        Ok(())
    })?;
    Ok(w.into_inner())
}

/// A parsed element. Text split by child elements is concatenated.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text of the child `name`, empty if there is none.
    fn text_of(&self, name: &str) -> String {
        self.child(name).map(|c| c.text.clone()).unwrap_or_default()
    }

    /// Number in the child `name`. A missing or empty child reads as zero.
    fn number<T: FromStr + Default>(&self, name: &str) -> Result<T, CodecError> {
        match self.child(name).map(|c| c.text.trim()) {
            None | Some("") => Ok(T::default()),
            Some(text) => {
                text.parse().map_err(|_| {
                    CodecError::Invalid(format!("<{name}> is not a number: {text}"))
                })
            }
        }
    }

    /// Children as key/value pairs, the element name being the key.
    fn entries(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.children.iter().map(|c| (c.name.clone(), c.text.clone()))
    }
}

fn parse_root(body: &[u8], name: &str) -> Result<Element, CodecError> {
    let root = parse(body)?;
    if root.name != name {
        return Err(CodecError::Invalid(format!(
            "expected <{name}> document, found <{}>",
            root.name
        )));
    }
    Ok(root)
}

fn parse(body: &[u8]) -> Result<Element, CodecError> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut open: Vec<Element> = Vec::new();
    loop {
        let closed = match reader.read_event()? {
            Event::Start(start) => {
                open.push(start_element(&start)?);
                continue;
            }
            Event::Empty(start) => start_element(&start)?,
            Event::End(_) => {
                open.pop()
                    .ok_or_else(|| CodecError::Invalid("unbalanced end tag".into()))?
            }
            Event::Text(text) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
                continue;
            }
            Event::CData(data) => {
                if let Some(current) = open.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
                continue;
            }
            Event::Eof => return Err(CodecError::Invalid("document has no root element".into())),
            _ => continue,
        };
        match open.last_mut() {
            Some(parent) => parent.children.push(closed),
            None => return Ok(closed),
        }
    }
}

fn start_element(start: &BytesStart<'_>) -> Result<Element, CodecError> {
    let attributes = start
        .attributes()
        .map(|attribute| -> Result<(String, String), CodecError> {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            Ok((key, attribute.unescape_value()?.into_owned()))
        })
        .collect::<Result<_, _>>()?;
    Ok(Element {
        name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        attributes,
        ..Default::default()
    })
}

fn application(element: &Element) -> Result<Application, CodecError> {
    Ok(Application {
        name: element.text_of("name"),
        instances: element
            .children_named("instance")
            .map(|e| instance(e).map(Arc::new))
            .collect::<Result<_, _>>()?,
    })
}

fn status(element: Option<&Element>) -> StatusType {
    element
        .and_then(|e| e.text.trim().parse().ok())
        .unwrap_or_default()
}

fn instance(e: &Element) -> Result<Instance, CodecError> {
    Ok(Instance {
        instance_id: e.text_of("instanceId"),
        host_name: e.text_of("hostName"),
        app: e.text_of("app"),
        ip_addr: e.text_of("ipAddr"),
        vip_address: e.text_of("vipAddress"),
        secure_vip_address: e.text_of("secureVipAddress"),
        status: status(e.child("status")),
        overridden_status: status(
            e.child("overriddenstatus")
                .or_else(|| e.child("overriddenStatus")),
        ),
        port: port(e.child("port"))?,
        secure_port: port(e.child("securePort"))?,
        home_page_url: e.text_of("homePageUrl"),
        status_page_url: e.text_of("statusPageUrl"),
        health_check_url: e.text_of("healthCheckUrl"),
        country_id: e.number("countryId")?,
        data_center_info: e
            .child("dataCenterInfo")
            .map(data_center_info)
            .transpose()?
            .unwrap_or_default(),
        lease_info: e
            .child("leaseInfo")
            .map(lease_info)
            .transpose()?
            .unwrap_or_default(),
        metadata: e
            .child("metadata")
            .map(|m| InstanceMetadata::from_strings(m.entries()))
            .unwrap_or_default(),
        unique_id: None,
    })
}

fn port(element: Option<&Element>) -> Result<Port, CodecError> {
    let Some(element) = element else {
        return Ok(Port::default());
    };
    let text = element.text.trim();
    let number = if text.is_empty() {
        0
    } else {
        text.parse()
            .map_err(|_| CodecError::Invalid(format!("unexpected port number: {text}")))?
    };
    Ok(Port {
        number,
        enabled: element.attribute("enabled") == Some("true"),
    })
}

fn data_center_info(e: &Element) -> Result<DataCenterInfo, CodecError> {
    let name = e.text_of("name");
    let metadata: HashMap<String, String> = e
        .child("metadata")
        .map(|m| m.entries().collect())
        .unwrap_or_default();
    if name == AMAZON {
        return Ok(DataCenterInfo::Amazon(amazon_metadata(metadata)?));
    }
    Ok(DataCenterInfo::Other {
        name,
        class: e.attribute("class").unwrap_or_default().to_string(),
        metadata,
    })
}

fn lease_info(e: &Element) -> Result<LeaseInfo, CodecError> {
    Ok(LeaseInfo {
        renewal_interval_in_secs: e.number("renewalIntervalInSecs")?,
        duration_in_secs: e.number("durationInSecs")?,
        registration_timestamp: e.number("registrationTimestamp")?,
        last_renewal_timestamp: e.number("lastRenewalTimestamp")?,
        eviction_timestamp: e.number("evictionTimestamp")?,
        service_up_timestamp: e.number("serviceUpTimestamp")?,
    })
}

type XmlWriter = Writer<Vec<u8>>;

fn element(
    w: &mut XmlWriter,
    name: &str,
    attributes: &[(&str, &str)],
    content: impl FnOnce(&mut XmlWriter) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    let mut start = BytesStart::new(name);
    for &attribute in attributes {
        start.push_attribute(attribute);
    }
    w.write_event(Event::Start(start))?;
    content(w)?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn text_element(w: &mut XmlWriter, name: &str, text: &str) -> Result<(), CodecError> {
    element(w, name, &[], |w| {
        w.write_event(Event::Text(BytesText::new(text)))?;
        Ok(())
    })
}

fn write_application(w: &mut XmlWriter, application: &Application) -> Result<(), CodecError> {
    element(w, "application", &[], |w| {
        text_element(w, "name", &application.name)?;
        for instance in &application.instances {
            write_instance(w, instance)?;
        }
        Ok(())
    })
}

fn write_instance(w: &mut XmlWriter, i: &Instance) -> Result<(), CodecError> {
    element(w, "instance", &[], |w| {
        text_element(w, "instanceId", &i.instance_id)?;
        text_element(w, "hostName", &i.host_name)?;
        text_element(w, "app", &i.app)?;
        text_element(w, "ipAddr", &i.ip_addr)?;
        text_element(w, "vipAddress", &i.vip_address)?;
        text_element(w, "secureVipAddress", &i.secure_vip_address)?;
        text_element(w, "status", i.status.as_str())?;
        text_element(w, "overriddenstatus", i.overridden_status.as_str())?;
        write_port(w, "port", i.port)?;
        write_port(w, "securePort", i.secure_port)?;
        text_element(w, "homePageUrl", &i.home_page_url)?;
        text_element(w, "statusPageUrl", &i.status_page_url)?;
        text_element(w, "healthCheckUrl", &i.health_check_url)?;
        text_element(w, "countryId", &i.country_id.to_string())?;
        write_data_center_info(w, &i.data_center_info)?;
        write_lease_info(w, &i.lease_info)?;
        write_metadata(w, &i.metadata)
    })
}

fn write_port(w: &mut XmlWriter, name: &str, port: Port) -> Result<(), CodecError> {
    let enabled = if port.enabled { "true" } else { "false" };
    element(w, name, &[("enabled", enabled)], |w| {
        w.write_event(Event::Text(BytesText::new(&port.number.to_string())))?;
        Ok(())
    })
}

fn write_entries<'a>(
    w: &mut XmlWriter,
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<(), CodecError> {
    element(w, "metadata", &[], |w| {
        for (key, value) in entries {
            text_element(w, key, value)?;
        }
        Ok(())
    })
}

fn write_data_center_info(w: &mut XmlWriter, info: &DataCenterInfo) -> Result<(), CodecError> {
    match info {
        DataCenterInfo::Amazon(metadata) => {
            let Value::Object(entries) = serde_json::to_value(metadata)? else {
                return Err(CodecError::Invalid("AWS metadata is not a map".into()));
            };
            element(w, "dataCenterInfo", &[("class", AMAZON_INFO_CLASS)], |w| {
                text_element(w, "name", AMAZON)?;
                write_entries(
                    w,
                    entries
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.as_str(), v))),
                )
            })
        }
        DataCenterInfo::Other {
            name,
            class,
            metadata,
        } => {
            let class = if name == MY_OWN {
                MY_DATA_CENTER_INFO_CLASS
            } else {
                class.as_str()
            };
            let attributes = if class.is_empty() {
                Vec::new()
            } else {
                vec![("class", class)]
            };
            element(w, "dataCenterInfo", &attributes, |w| {
                text_element(w, "name", name)?;
                if metadata.is_empty() {
                    return Ok(());
                }
                write_entries(w, metadata.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            })
        }
    }
}

fn write_lease_info(w: &mut XmlWriter, lease: &LeaseInfo) -> Result<(), CodecError> {
    element(w, "leaseInfo", &[], |w| {
        text_element(
            w,
            "renewalIntervalInSecs",
            &lease.renewal_interval_in_secs.to_string(),
        )?;
        text_element(w, "durationInSecs", &lease.duration_in_secs.to_string())?;
        text_element(
            w,
            "registrationTimestamp",
            &lease.registration_timestamp.to_string(),
        )?;
        text_element(
            w,
            "lastRenewalTimestamp",
            &lease.last_renewal_timestamp.to_string(),
        )?;
        text_element(w, "evictionTimestamp", &lease.eviction_timestamp.to_string())?;
        text_element(
            w,
            "serviceUpTimestamp",
            &lease.service_up_timestamp.to_string(),
        )
    })
}

/// Writes one element per metadata key. Keys starting with `@` are JSON dialect annotations and
/// are left out.
fn write_metadata(w: &mut XmlWriter, metadata: &InstanceMetadata) -> Result<(), CodecError> {
    let map = metadata
        .map()
        .map_err(|e| CodecError::Invalid(format!("unusable instance metadata: {e}")))?;
    let entries: Vec<(&str, Cow<'_, str>)> = map
        .iter()
        .filter(|(key, _)| !key.starts_with('@'))
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Cow::Borrowed(s.as_str()),
                other => Cow::Owned(other.to_string()),
            };
            (key.as_str(), value)
        })
        .collect();
    write_entries(w, entries.iter().map(|(k, v)| (*k, v.as_ref())))
}
