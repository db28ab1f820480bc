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
//! JSON dialect of the registry documents.
//!
//! The registry is lenient in what it sends:
//! - A list holding a single element is sometimes sent as the bare element. This applies to the
//!   applications of an applications document and to the instances of an application.
//! - Port numbers and the version delta come as either JSON numbers or strings.
//! - Data center metadata values that look like numbers are sent as JSON numbers.
//!
//! All of these decode to the same in-memory values.

use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, MapAccess, SeqAccess, Visitor, value::MapAccessDeserializer},
};
use serde_json::{Map, Value, value::RawValue};

use super::{AMAZON_INFO_CLASS, MY_DATA_CENTER_INFO_CLASS, amazon_metadata};
use crate::model::{
    AMAZON, Application, Applications, DataCenterInfo, Instance, InstanceMetadata, MY_OWN, Port,
    StatusType,
};

/// Decodes an `{"applications": ...}` document, as returned for all-application and VIP
/// queries.
pub fn decode_applications(body: &[u8]) -> Result<Applications, serde_json::Error> {
    let doc: ApplicationsDocument = serde_json::from_slice(body)?;
    let versions_delta = int_from_number_or_string(&doc.applications.versions_delta)
        .ok_or_else(|| {
            de::Error::custom(format!(
                "unexpected versions delta: {}",
                doc.applications.versions_delta
            ))
        })?;
    Ok(Applications {
        versions_delta,
        apps_hashcode: doc.applications.apps_hashcode,
        applications: doc.applications.application.0,
    })
}

/// Decodes an `{"application": ...}` document.
pub fn decode_application(body: &[u8]) -> Result<Application, serde_json::Error> {
    let doc: ApplicationDocument = serde_json::from_slice(body)?;
    Ok(doc.application)
}

/// Decodes an `{"instance": ...}` document.
pub fn decode_instance(body: &[u8]) -> Result<Instance, serde_json::Error> {
    let doc: InstanceDocument = serde_json::from_slice(body)?;
    Ok(doc.instance)
}

/// Encodes an instance as an `{"instance": ...}` document.
pub fn encode_instance(instance: &Instance) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&InstanceDocumentRef { instance })
}

/// Encodes an application as an `{"application": ...}` document.
pub fn encode_application(application: &Application) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ApplicationDocumentRef { application })
}

/// Encodes an `{"applications": ...}` document.
pub fn encode_applications(applications: &Applications) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ApplicationsDocumentRef {
        applications: WireApplicationsOut {
            versions_delta: applications.versions_delta.to_string(),
            apps_hashcode: &applications.apps_hashcode,
            application: &applications.applications,
        },
    })
}

#[derive(Deserialize)]
struct ApplicationsDocument {
    applications: WireApplicationsIn,
}

#[derive(Deserialize)]
struct WireApplicationsIn {
    #[serde(rename = "versions__delta", default)]
    versions_delta: Value,
    #[serde(rename = "apps__hashcode", default)]
    apps_hashcode: String,
    #[serde(default)]
    application: OneOrMany<Application>,
}

#[derive(Serialize)]
struct ApplicationsDocumentRef<'a> {
    applications: WireApplicationsOut<'a>,
}

#[derive(Serialize)]
struct WireApplicationsOut<'a> {
    #[serde(rename = "versions__delta")]
    versions_delta: String,
    #[serde(rename = "apps__hashcode")]
    apps_hashcode: &'a str,
    application: &'a [Application],
}

#[derive(Deserialize)]
struct ApplicationDocument {
    application: Application,
}

#[derive(Serialize)]
struct ApplicationDocumentRef<'a> {
    application: &'a Application,
}

#[derive(Deserialize)]
struct InstanceDocument {
    instance: Instance,
}

#[derive(Serialize)]
struct InstanceDocumentRef<'a> {
    instance: &'a Instance,
}

/// A list that may be sent as its single bare element.
///
/// Implemented with a visitor rather than an untagged enum, so that elements are decoded
/// straight from the input. Buffering would break [`RawValue`] in instance metadata.
struct OneOrMany<T>(Vec<T>);

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OneOrMany<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OneOrManyVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OneOrManyVisitor<T> {
            type Value = OneOrMany<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object or a list of objects")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(OneOrMany(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let item = T::deserialize(MapAccessDeserializer::new(map))?;
                Ok(OneOrMany(vec![item]))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(OneOrMany(Vec::new()))
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(OneOrMany(Vec::new()))
            }
        }

        deserializer.deserialize_any(OneOrManyVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
struct WireApplicationIn {
    #[serde(default)]
    name: String,
    #[serde(default)]
    instance: OneOrMany<Arc<Instance>>,
}

#[derive(Serialize)]
struct WireApplicationOut<'a> {
    name: &'a str,
    instance: &'a [Arc<Instance>],
}

impl<'de> Deserialize<'de> for Application {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireApplicationIn::deserialize(deserializer)?;
        Ok(Application {
            name: wire.name,
            instances: wire.instance.0,
        })
    }
}

impl Serialize for Application {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireApplicationOut {
            name: &self.name,
            instance: &self.instances,
        }
        .serialize(serializer)
    }
}

impl Serialize for StatusType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

/// `"@enabled"` is a string in every registry version seen so far. Booleans are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlexBool {
    Bool(bool),
    String(String),
}

impl FlexBool {
    fn as_bool(&self) -> bool {
        match self {
            FlexBool::Bool(b) => *b,
            FlexBool::String(s) => s == "true",
        }
    }
}

#[derive(Deserialize)]
struct WirePortIn {
    #[serde(rename = "$")]
    number: Value,
    #[serde(rename = "@enabled", default)]
    enabled: Option<FlexBool>,
}

#[derive(Serialize)]
struct WirePortOut {
    #[serde(rename = "$")]
    number: String,
    #[serde(rename = "@enabled")]
    enabled: String,
}

impl Serialize for Port {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WirePortOut {
            number: self.number.to_string(),
            enabled: self.enabled.to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WirePortIn::deserialize(deserializer)?;
        let number = int_from_number_or_string(&wire.number)
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| de::Error::custom(format!("unexpected port number: {}", wire.number)))?;
        Ok(Port {
            number,
            enabled: wire.enabled.is_some_and(|e| e.as_bool()),
        })
    }
}

fn int_from_number_or_string(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => Some(0),
        _ => None,
    }
}

#[derive(Deserialize)]
struct WireDataCenterInfoIn {
    #[serde(default)]
    name: String,
    #[serde(rename = "@class", default)]
    class: String,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
}

#[derive(Serialize)]
struct WireDataCenterInfoOut<'a, M> {
    #[serde(rename = "@class")]
    class: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<M>,
}

/// Converts a metadata value back to the string the registrant originally sent.
fn json_value_as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => format!("{:.0}", n.as_f64().unwrap_or_default()),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

impl<'de> Deserialize<'de> for DataCenterInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireDataCenterInfoIn::deserialize(deserializer)?;
        let metadata: HashMap<String, String> = wire
            .metadata
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, json_value_as_string(v)))
            .collect();

        if wire.name == AMAZON {
            let amazon = amazon_metadata(metadata).map_err(de::Error::custom)?;
            return Ok(DataCenterInfo::Amazon(amazon));
        }

        Ok(DataCenterInfo::Other {
            name: wire.name,
            class: wire.class,
            metadata,
        })
    }
}

impl Serialize for DataCenterInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DataCenterInfo::Amazon(metadata) => WireDataCenterInfoOut {
                class: AMAZON_INFO_CLASS,
                name: AMAZON,
                metadata: Some(metadata),
            }
            .serialize(serializer),
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
                WireDataCenterInfoOut {
                    class,
                    name,
                    metadata: (!metadata.is_empty()).then_some(metadata),
                }
                .serialize(serializer)
            }
        }
    }
}

impl Serialize for InstanceMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let Some(parsed) = self.parsed.get() {
            return parsed.serialize(serializer);
        }
        match &self.raw {
            Some(raw) => raw.serialize(serializer),
            None => Map::new().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for InstanceMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<Box<RawValue>>::deserialize(deserializer)?;
        Ok(InstanceMetadata {
            raw,
            parsed: Default::default(),
        })
    }
}
