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
//! Error types of the registry client.

use std::fmt::{self, Display};

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;

use crate::codec::CodecError;

/// Kind of registry operation a request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpOperation {
    /// Registering an instance.
    Registration,
    /// Deregistering an instance.
    Deregistration,
    /// Updating instance metadata.
    MetadataUpdate,
    /// Updating instance status.
    StatusUpdate,
    /// Heartbeat.
    LeaseRenewal,
    /// Any read.
    Retrieval,
}

impl Display for HttpOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpOperation::Registration => "registration",
            HttpOperation::Deregistration => "deregistration",
            HttpOperation::MetadataUpdate => "metadata update",
            HttpOperation::StatusUpdate => "status update",
            HttpOperation::LeaseRenewal => "lease renewal",
            HttpOperation::Retrieval => "retrieval",
        };
        f.write_str(s)
    }
}

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested application is not registered.
    #[error("application not found for name={0}")]
    AppNotFound(String),
    /// The registry answered with an unexpected status code.
    #[error("{op} failed, rcode = {status}")]
    UnsuccessfulResponse {
        /// Operation the request was issued for.
        op: HttpOperation,
        /// Status code of the response.
        status: StatusCode,
        /// Response body.
        body: Bytes,
    },
    /// The request could not be sent or no response was received, after all retries.
    #[error("{op} request failed: {source}")]
    Transport {
        /// Operation the request was issued for.
        op: HttpOperation,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The response body could not be decoded.
    #[error("failed to decode {context}: {source}")]
    Decode {
        /// What was being decoded.
        context: &'static str,
        /// The offending body.
        body: Bytes,
        /// Underlying decode error.
        #[source]
        source: CodecError,
    },
    /// The request body could not be encoded.
    #[error("failed to encode instance: {0}")]
    Encode(#[source] CodecError),
    /// An instance query option was invalid.
    #[error("invalid query option: {0}")]
    InvalidQueryOption(#[from] QueryOptionError),
    /// No registry URL is known.
    #[error("no registry service URLs are known")]
    NoServiceUrls,
    /// A registry URL could not be built.
    #[error("invalid registry URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RegistryError {
    /// Returns true if the registry rejected a proposed instance as invalid during registration.
    pub fn instance_was_invalid(&self) -> bool {
        match self {
            RegistryError::UnsuccessfulResponse { op, status, .. } => {
                matches!(op, HttpOperation::Registration) && *status == StatusCode::BAD_REQUEST
            }
            _ => false,
        }
    }

    /// Returns true if the operation failed because the target instance is not registered.
    pub fn instance_was_missing(&self) -> bool {
        match self {
            RegistryError::UnsuccessfulResponse { op, status, .. } => {
                match op {
                    HttpOperation::Deregistration
                    | HttpOperation::StatusUpdate
                    | HttpOperation::LeaseRenewal
                    | HttpOperation::Retrieval => *status == StatusCode::NOT_FOUND,
                    // The registry answers metadata updates of unknown instances with a 500.
                    HttpOperation::MetadataUpdate => *status == StatusCode::INTERNAL_SERVER_ERROR,
                    HttpOperation::Registration => false,
                }
            }
            _ => false,
        }
    }

    /// Returns true if the error is a not-found answer for an application or instance.
    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::AppNotFound(_) => true,
            RegistryError::UnsuccessfulResponse { status, .. } => *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

/// Errors raised while composing instance query options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryOptionError {
    /// A status restriction was requested with an empty status.
    #[error("invalid instance status: status must not be empty")]
    EmptyStatus,
    /// A status restriction named a status that does not exist.
    #[error("invalid instance status: {0:?}")]
    UnknownStatus(String),
}

/// Errors raised when reading instance metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The raw metadata is not valid JSON.
    #[error("failed to parse metadata: {0}")]
    Parse(#[from] serde_json::Error),
    /// The raw metadata is valid JSON but not an object.
    #[error("metadata is not a JSON object")]
    NotAnObject,
    /// The key is not present.
    #[error("metadata key {0:?} not found")]
    Missing(String),
    /// The value has an unexpected type.
    #[error("metadata key {key:?} is not a {expected}")]
    WrongType {
        /// The key.
        key: String,
        /// Expected type.
        expected: &'static str,
    },
}

impl MetadataError {
    pub(crate) fn wrong_type(key: &str, expected: &'static str) -> Self {
        MetadataError::WrongType {
            key: key.to_string(),
            expected,
        }
    }
}
