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
//! Registry data model.
//!
//! An [`Application`] is a named, ordered group of [`Instance`]s. Instances are shared through
//! [`Arc`] so that filtered views and caches never deep-copy them.
//!
//! The wire encoding of these types lives in [`crate::codec`].

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::{self, Debug, Display},
    str::FromStr,
    sync::{Arc, OnceLock},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, value::RawValue};

use crate::error::{MetadataError, QueryOptionError};

/// Data center name of instances running in AWS.
pub const AMAZON: &str = "Amazon";
/// Data center name of instances running in a self-managed data center.
pub const MY_OWN: &str = "MyOwn";

/// A named group of instances, in registry order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Application {
    /// Name of the application, as registered (usually upper case).
    pub name: String,
    /// Registered instances, in the order the registry returned them.
    pub instances: Vec<Arc<Instance>>,
}

/// The full set of registered applications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applications {
    /// Registry version delta.
    pub versions_delta: i64,
    /// Registry hash code of the application set.
    pub apps_hashcode: String,
    /// The applications.
    pub applications: Vec<Application>,
}

impl Applications {
    /// Consumes the set and indexes the applications by name.
    pub fn into_map(self) -> HashMap<String, Application> {
        self.applications
            .into_iter()
            .map(|app| (app.name.clone(), app))
            .collect()
    }
}

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StatusType {
    /// Ready to receive traffic.
    Up,
    /// Not functional.
    Down,
    /// Initializing.
    Starting,
    /// Deliberately taken out of traffic.
    OutOfService,
    /// Status is not known.
    #[default]
    Unknown,
}

impl StatusType {
    /// Registry representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::Up => "UP",
            StatusType::Down => "DOWN",
            StatusType::Starting => "STARTING",
            StatusType::OutOfService => "OUT_OF_SERVICE",
            StatusType::Unknown => "UNKNOWN",
        }
    }
}

impl AsRef<str> for StatusType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusType {
    type Err = QueryOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(QueryOptionError::EmptyStatus),
            "UP" => Ok(StatusType::Up),
            "DOWN" => Ok(StatusType::Down),
            "STARTING" => Ok(StatusType::Starting),
            "OUT_OF_SERVICE" => Ok(StatusType::OutOfService),
            "UNKNOWN" => Ok(StatusType::Unknown),
            other => Err(QueryOptionError::UnknownStatus(other.to_string())),
        }
    }
}

/// A network port declared by an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Port {
    /// Port number.
    pub number: u16,
    /// Whether the registrant considers the port enabled.
    pub enabled: bool,
}

impl Port {
    /// An enabled port.
    pub fn enabled(number: u16) -> Self {
        Self {
            number,
            enabled: true,
        }
    }
}

/// Instance metadata provided by the AWS metadata service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AmazonMetadata {
    pub ami_launch_index: String,
    pub local_hostname: String,
    pub availability_zone: String,
    pub instance_id: String,
    pub public_ipv4: String,
    pub public_hostname: String,
    pub ami_manifest_path: String,
    pub local_ipv4: String,
    pub hostname: String,
    pub ami_id: String,
    pub instance_type: String,
}

/// Describes the data center an instance runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataCenterInfo {
    /// Running in AWS, with the structured instance metadata.
    Amazon(AmazonMetadata),
    /// Any other data center.
    Other {
        /// Data center name, e.g. [`MY_OWN`].
        name: String,
        /// Java class tag reported by the registry.
        class: String,
        /// Free-form metadata.
        metadata: HashMap<String, String>,
    },
}

impl DataCenterInfo {
    /// A self-managed data center without metadata.
    pub fn my_own() -> Self {
        DataCenterInfo::Other {
            name: MY_OWN.to_string(),
            class: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// Name of the data center.
    pub fn name(&self) -> &str {
        match self {
            DataCenterInfo::Amazon(_) => AMAZON,
            DataCenterInfo::Other { name, .. } => name,
        }
    }
}

impl Default for DataCenterInfo {
    fn default() -> Self {
        Self::my_own()
    }
}

/// Lease timing of a registered instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaseInfo {
    pub renewal_interval_in_secs: i32,
    pub duration_in_secs: i32,
    pub registration_timestamp: i64,
    pub last_renewal_timestamp: i64,
    pub eviction_timestamp: i64,
    pub service_up_timestamp: i64,
}

/// Function computing an identifier for instances that carry no explicit instance id.
pub type UniqueIdFn = Arc<dyn Fn(&Instance) -> String + Send + Sync>;

/// Custom identity strategy attached to an instance.
///
/// Two strategies are equal only if they share the same function.
#[derive(Clone)]
pub struct UniqueId(pub UniqueIdFn);

impl UniqueId {
    /// Wraps the given function.
    pub fn new(f: impl Fn(&Instance) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UniqueId(..)")
    }
}

impl PartialEq for UniqueId {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Application-defined metadata of an instance.
///
/// The raw JSON object received from the registry is kept as is and only parsed on first
/// access.
#[derive(Default, Clone)]
pub struct InstanceMetadata {
    pub(crate) raw: Option<Box<RawValue>>,
    pub(crate) parsed: OnceLock<Map<String, Value>>,
}

impl InstanceMetadata {
    /// Creates metadata from already parsed key/value pairs.
    pub fn from_strings<K: Into<String>, V: Into<String>>(
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let map: Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self {
            raw: None,
            parsed: OnceLock::from(map),
        }
    }

    /// Raw JSON as received from the registry, if any.
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref().map(RawValue::get)
    }

    /// Returns the parsed metadata map, parsing the raw JSON if not done yet.
    pub fn map(&self) -> Result<&Map<String, Value>, MetadataError> {
        if let Some(parsed) = self.parsed.get() {
            return Ok(parsed);
        }
        let parsed = parse_raw(self.raw.as_deref())?;
        Ok(self.parsed.get_or_init(|| parsed))
    }

    /// Returns the value under `key` as a string.
    pub fn get_string(&self, key: &str) -> Result<String, MetadataError> {
        match self.get(key)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(MetadataError::wrong_type(key, "string")),
        }
    }

    /// Returns the value under `key` as an integer.
    pub fn get_int(&self, key: &str) -> Result<i64, MetadataError> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| MetadataError::wrong_type(key, "integer")),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| MetadataError::wrong_type(key, "integer")),
            _ => Err(MetadataError::wrong_type(key, "integer")),
        }
    }

    /// Returns the value under `key` as a float.
    pub fn get_float(&self, key: &str) -> Result<f64, MetadataError> {
        match self.get(key)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| MetadataError::wrong_type(key, "float")),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| MetadataError::wrong_type(key, "float")),
            _ => Err(MetadataError::wrong_type(key, "float")),
        }
    }

    /// Returns the value under `key` as a bool.
    pub fn get_bool(&self, key: &str) -> Result<bool, MetadataError> {
        match self.get(key)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| MetadataError::wrong_type(key, "bool")),
            _ => Err(MetadataError::wrong_type(key, "bool")),
        }
    }

    /// Sets `key` to the string `value`.
    ///
    /// Unparseable raw metadata is discarded.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if self.parsed.get().is_none() {
            let parsed = parse_raw(self.raw.as_deref()).unwrap_or_else(|e| {
                tracing::warn!(err = %e, "Discarding unparseable instance metadata");
                Map::new()
            });
            let _ = self.parsed.set(parsed);
        }
        if let Some(parsed) = self.parsed.get_mut() {
            parsed.insert(key.into(), Value::String(value.into()));
        }
    }

    fn get(&self, key: &str) -> Result<&Value, MetadataError> {
        self.map()?
            .get(key)
            .ok_or_else(|| MetadataError::Missing(key.to_string()))
    }
}

fn parse_raw(raw: Option<&RawValue>) -> Result<Map<String, Value>, MetadataError> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw.get())? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(MetadataError::NotAnObject),
    }
}

impl Debug for InstanceMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parsed.get() {
            Some(parsed) => f.debug_map().entries(parsed.iter()).finish(),
            None => f.write_str(self.raw().unwrap_or("{}")),
        }
    }
}

impl PartialEq for InstanceMetadata {
    fn eq(&self, other: &Self) -> bool {
        match (self.map(), other.map()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.raw() == other.raw(),
        }
    }
}

/// A registered instance of an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    /// Explicit identifier. Empty for registrants that do not set one.
    pub instance_id: String,
    /// Host name of the instance.
    pub host_name: String,
    /// Application name.
    pub app: String,
    /// IP address of the instance.
    pub ip_addr: String,
    /// Virtual address used for VIP queries.
    pub vip_address: String,
    /// Virtual address used for secure VIP queries.
    pub secure_vip_address: String,
    /// Current status.
    pub status: StatusType,
    /// Status override set by an operator.
    #[serde(rename = "overriddenstatus", alias = "overriddenStatus")]
    pub overridden_status: StatusType,
    /// Plain port.
    pub port: Port,
    /// TLS port.
    pub secure_port: Port,
    pub home_page_url: String,
    pub status_page_url: String,
    pub health_check_url: String,
    pub country_id: i64,
    /// Data center the instance runs in.
    pub data_center_info: DataCenterInfo,
    /// Lease timing.
    pub lease_info: LeaseInfo,
    /// Application metadata.
    pub metadata: InstanceMetadata,
    /// Custom identity strategy, see [`Instance::id`].
    #[serde(skip)]
    pub unique_id: Option<UniqueId>,
}

impl Instance {
    /// Returns the identifier of this instance.
    ///
    /// Resolution order: the explicit instance id, then the custom identity function, then the
    /// AWS instance id (which may be empty), then the host name.
    pub fn id(&self) -> Cow<'_, str> {
        if !self.instance_id.is_empty() {
            return Cow::Borrowed(&self.instance_id);
        }
        if let Some(unique_id) = &self.unique_id {
            return Cow::Owned((unique_id.0)(self));
        }
        if let DataCenterInfo::Amazon(metadata) = &self.data_center_info {
            return Cow::Borrowed(&metadata.instance_id);
        }
        Cow::Borrowed(&self.host_name)
    }

    /// Sets a metadata string, see [`InstanceMetadata::set_string`].
    pub fn set_metadata_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.set_string(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance {
            host_name: "i-6543.example.com".to_string(),
            app: "TESTAPP".to_string(),
            ..Default::default()
        }
    }

    mod identity {
        use super::*;

        #[test]
        fn explicit_id_wins() {
            let mut i = instance();
            i.instance_id = "explicit".to_string();
            i.unique_id = Some(UniqueId::new(|_| "custom".to_string()));
            assert_eq!(i.id(), "explicit");
        }

        #[test]
        fn custom_function_before_data_center() {
            let mut i = instance();
            i.data_center_info = DataCenterInfo::Amazon(AmazonMetadata {
                instance_id: "i-123".to_string(),
                ..Default::default()
            });
            i.unique_id = Some(UniqueId::new(|i| format!("{}:{}", i.host_name, i.app)));
            assert_eq!(i.id(), "i-6543.example.com:TESTAPP");
        }

        #[test]
        fn amazon_instance_id_before_host_name() {
            let mut i = instance();
            i.data_center_info = DataCenterInfo::Amazon(AmazonMetadata {
                instance_id: "i-123".to_string(),
                ..Default::default()
            });
            assert_eq!(i.id(), "i-123");
        }

        #[test]
        fn empty_amazon_instance_id_is_returned() {
            let mut i = instance();
            i.data_center_info = DataCenterInfo::Amazon(AmazonMetadata::default());
            assert_eq!(i.id(), "");
        }

        #[test]
        fn host_name_as_fallback() {
            assert_eq!(instance().id(), "i-6543.example.com");
        }
    }

    mod metadata {
        use super::*;

        fn from_json(json: &str) -> InstanceMetadata {
            InstanceMetadata {
                raw: Some(RawValue::from_string(json.to_string()).unwrap()),
                parsed: OnceLock::new(),
            }
        }

        #[test]
        fn parses_lazily() {
            let m = from_json(r#"{"a":"1","b":2.5,"c":true,"d":"text"}"#);
            assert!(m.parsed.get().is_none());

            assert_eq!(m.get_int("a").unwrap(), 1);
            assert!(m.parsed.get().is_some());
            assert_eq!(m.get_float("b").unwrap(), 2.5);
            assert!(m.get_bool("c").unwrap());
            assert_eq!(m.get_string("d").unwrap(), "text");
        }

        #[test]
        fn missing_and_mistyped_keys() {
            let m = from_json(r#"{"d":"text"}"#);
            assert!(matches!(m.get_string("x"), Err(MetadataError::Missing(k)) if k == "x"));
            assert!(matches!(
                m.get_int("d"),
                Err(MetadataError::WrongType { .. })
            ));
        }

        #[test]
        fn invalid_raw_is_an_error() {
            let m = from_json(r#"["not", "an", "object"]"#);
            assert!(matches!(m.map(), Err(MetadataError::NotAnObject)));
        }

        #[test]
        fn set_string_keeps_existing_entries() {
            let mut m = from_json(r#"{"a":"1"}"#);
            m.set_string("b", "2");
            assert_eq!(m.get_string("a").unwrap(), "1");
            assert_eq!(m.get_string("b").unwrap(), "2");
        }

        #[test]
        fn empty_metadata() {
            let m = InstanceMetadata::default();
            assert!(m.map().unwrap().is_empty());
        }

        #[test]
        fn from_strings_is_already_parsed() {
            let m = InstanceMetadata::from_strings([("weight", "10"), ("zone", "eu-1a")]);
            assert!(m.raw().is_none());
            assert!(m.parsed.get().is_some());
            assert_eq!(m.get_int("weight").unwrap(), 10);
            assert_eq!(m.get_string("zone").unwrap(), "eu-1a");
        }
    }

    #[test]
    fn status_from_str() {
        assert_eq!("UP".parse::<StatusType>().unwrap(), StatusType::Up);
        assert_eq!(
            "OUT_OF_SERVICE".parse::<StatusType>().unwrap(),
            StatusType::OutOfService
        );
        assert_eq!(
            "".parse::<StatusType>().unwrap_err(),
            QueryOptionError::EmptyStatus
        );
        assert!(matches!(
            "up".parse::<StatusType>(),
            Err(QueryOptionError::UnknownStatus(_))
        ));
    }
}
