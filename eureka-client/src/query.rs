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
//! Instance queries.
//!
//! A query is described by a sequence of [`InstanceQueryOption`]s. They are applied left to
//! right into an immutable [`InstanceQueryOptions`] once per call, which is then reused for every
//! scheduled update of that call.
//!
//! # Example
//!
//! ```
//! use eureka_client::query::{InstanceQueryOptions, shuffled, that_are_up, with_status};
//!
//! let options = InstanceQueryOptions::new([
//!     Some(that_are_up()),
//!     Some(with_status("STARTING")),
//!     None,
//!     Some(shuffled()),
//! ])
//! .unwrap();
//! assert!(options.is_shuffled());
//!
//! assert!(InstanceQueryOptions::new([with_status("")]).is_err());
//! ```

pub mod filter;
pub mod shuffle;

use std::{borrow::Cow, fmt, sync::Arc};

use crate::{
    error::QueryOptionError,
    model::{Application, Instance, StatusType},
    query::{
        filter::{filter_applications, filter_applications_owned},
        shuffle::{RandomIndex, default_random_index, shuffle},
    },
};

type ApplyFn = dyn FnOnce(&mut InstanceQueryOptions) -> Result<(), QueryOptionError> + Send;

/// A single query directive.
pub struct InstanceQueryOption(Box<ApplyFn>);

impl InstanceQueryOption {
    fn new(
        f: impl FnOnce(&mut InstanceQueryOptions) -> Result<(), QueryOptionError> + Send + 'static,
    ) -> Self {
        Self(Box::new(f))
    }
}

impl fmt::Debug for InstanceQueryOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstanceQueryOption(..)")
    }
}

/// Restricts results to instances with the given status.
///
/// Several status restrictions combine: an instance matches if it has any of them. The status
/// is validated when the options are composed.
pub fn with_status(status: impl AsRef<str>) -> InstanceQueryOption {
    let status = status.as_ref().to_string();
    InstanceQueryOption::new(move |options| {
        let status: StatusType = status.parse()?;
        options.statuses.get_or_insert_with(Vec::new).push(status);
        Ok(())
    })
}

/// Restricts results to instances that are [`StatusType::Up`].
pub fn that_are_up() -> InstanceQueryOption {
    with_status(StatusType::Up)
}

/// Shuffles results with the shared default random source.
pub fn shuffled() -> InstanceQueryOption {
    shuffled_with(default_random_index())
}

/// Shuffles results with the given random source.
///
/// A later shuffle option replaces an earlier one.
pub fn shuffled_with(random_index: RandomIndex) -> InstanceQueryOption {
    InstanceQueryOption::new(move |options| {
        options.random_index = Some(random_index);
        Ok(())
    })
}

/// Composed query options.
#[derive(Clone, Default)]
pub struct InstanceQueryOptions {
    /// Accepted statuses. `None` accepts every instance.
    statuses: Option<Vec<StatusType>>,
    random_index: Option<RandomIndex>,
}

impl fmt::Debug for InstanceQueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceQueryOptions")
            .field("statuses", &self.statuses)
            .field("shuffled", &self.is_shuffled())
            .finish()
    }
}

impl InstanceQueryOptions {
    /// Applies `options` left to right. `None` entries are skipped.
    pub fn new<I>(options: I) -> Result<Self, QueryOptionError>
    where
        I: IntoIterator,
        I::Item: Into<Option<InstanceQueryOption>>,
    {
        let mut composed = Self::default();
        for option in options {
            let option: Option<InstanceQueryOption> = option.into();
            if let Some(InstanceQueryOption(apply)) = option {
                apply(&mut composed)?;
            }
        }
        Ok(composed)
    }

    /// Returns whether `instance` passes the status restrictions.
    pub fn matches(&self, instance: &Instance) -> bool {
        match &self.statuses {
            None => true,
            Some(statuses) => statuses.contains(&instance.status),
        }
    }

    /// Returns whether results are shuffled.
    pub fn is_shuffled(&self) -> bool {
        self.random_index.is_some()
    }

    /// Selects the matching instances of `applications`.
    ///
    /// Borrows from `applications` when possible, see [`filter_applications`]. Shuffling always
    /// produces an owned result.
    pub fn select<'a>(&self, applications: &'a [Application]) -> Cow<'a, [Arc<Instance>]> {
        let selected = filter_applications(applications, |i| self.matches(i));
        match &self.random_index {
            None => selected,
            Some(random_index) => {
                let mut owned = selected.into_owned();
                shuffle(&mut owned, |n| random_index(n));
                Cow::Owned(owned)
            }
        }
    }

    /// Owned counterpart of [`InstanceQueryOptions::select`].
    pub fn select_owned(&self, applications: Vec<Application>) -> Vec<Arc<Instance>> {
        let mut selected = filter_applications_owned(applications, |i| self.matches(i));
        if let Some(random_index) = &self.random_index {
            shuffle(&mut selected, |n| random_index(n));
        }
        selected
    }
}
