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
//! Uniform in-place shuffling with an injectable random source.

use std::sync::{Arc, LazyLock};

use rand::Rng;

/// Returns a uniformly distributed index in `[0, n)`. Called with `n >= 2` only.
pub type RandomIndex = Arc<dyn Fn(usize) -> usize + Send + Sync>;

static DEFAULT_RANDOM_INDEX: LazyLock<RandomIndex> =
    LazyLock::new(|| Arc::new(|n: usize| rand::rng().random_range(0..n)));

/// The shared random source backed by the thread local generator.
pub fn default_random_index() -> RandomIndex {
    DEFAULT_RANDOM_INDEX.clone()
}

/// Permutes `items` uniformly at random, in place.
///
/// Uses the inside-out Fisher-Yates algorithm: for every `i` in `1..len`, element `i` is swapped
/// with element `random_index(i + 1)`. `random_index` is called `len - 1` times.
pub fn shuffle<T>(items: &mut [T], random_index: impl Fn(usize) -> usize) {
    for i in 1..items.len() {
        let j = random_index(i + 1);
        items.swap(i, j);
    }
}
