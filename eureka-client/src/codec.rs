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
//! Wire encodings of the registry documents.
//!
//! The registry speaks two dialects, JSON ([`json`]) and XML ([`xml`]). A connection uses one
//! of them for all its requests, selected through [`WireFormat`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{AmazonMetadata, Application, Applications, Instance};

pub mod json;
pub mod xml;

pub(crate) const AMAZON_INFO_CLASS: &str = "com.netflix.appinfo.AmazonInfo";
pub(crate) const MY_DATA_CENTER_INFO_CLASS: &str = "com.netflix.appinfo.MyDataCenterInfo";

/// Errors raised while encoding or decoding registry documents.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed JSON, or JSON of an unexpected shape.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Malformed XML.
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    /// Writing the document failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Well-formed document of an unexpected shape.
    #[error("{0}")]
    Invalid(String),
}

/// Wire encoding used to talk to the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `application/json`.
    #[default]
    Json,
    /// `application/xml`.
    Xml,
}

impl WireFormat {
    /// Media type sent in the `Accept` and `Content-Type` headers.
    pub fn content_type(self) -> &'static str {
        match self {
            WireFormat::Json => "application/json",
            WireFormat::Xml => "application/xml",
        }
    }

    /// Picks the format named by an `Accept` or `Content-Type` header value.
    pub fn from_media_type(value: &str) -> Option<Self> {
        let value = value.to_ascii_lowercase();
        if value.contains("json") {
            Some(WireFormat::Json)
        } else if value.contains("xml") {
            Some(WireFormat::Xml)
        } else {
            None
        }
    }

    /// Decodes an applications document, as returned for all-application and VIP queries.
    pub fn decode_applications(self, body: &[u8]) -> Result<Applications, CodecError> {
        match self {
            WireFormat::Json => Ok(json::decode_applications(body)?),
            WireFormat::Xml => xml::decode_applications(body),
        }
    }

    /// Decodes an application document.
    pub fn decode_application(self, body: &[u8]) -> Result<Application, CodecError> {
        match self {
            WireFormat::Json => Ok(json::decode_application(body)?),
            WireFormat::Xml => xml::decode_application(body),
        }
    }

    /// Decodes an instance document.
    pub fn decode_instance(self, body: &[u8]) -> Result<Instance, CodecError> {
        match self {
            WireFormat::Json => Ok(json::decode_instance(body)?),
            WireFormat::Xml => xml::decode_instance(body),
        }
    }

    /// Encodes an instance document.
    pub fn encode_instance(self, instance: &Instance) -> Result<Vec<u8>, CodecError> {
        match self {
            WireFormat::Json => Ok(json::encode_instance(instance)?),
            WireFormat::Xml => xml::encode_instance(instance),
        }
    }

    /// Encodes an application document.
    pub fn encode_application(self, application: &Application) -> Result<Vec<u8>, CodecError> {
        match self {
            WireFormat::Json => Ok(json::encode_application(application)?),
            WireFormat::Xml => xml::encode_application(application),
        }
    }

    /// Encodes an applications document.
    pub fn encode_applications(
        self,
        applications: &Applications,
    ) -> Result<Vec<u8>, CodecError> {
        match self {
            WireFormat::Json => Ok(json::encode_applications(applications)?),
            WireFormat::Xml => xml::encode_applications(applications),
        }
    }
}

/// Builds the AWS metadata from its string entries. Unknown keys are ignored.
pub(crate) fn amazon_metadata(
    entries: HashMap<String, String>,
) -> Result<AmazonMetadata, serde_json::Error> {
    let object = entries
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect::<Map<_, _>>();
    AmazonMetadata::deserialize(Value::Object(object))
}
