// Copyright 2025 Scriptweb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded header storage.
//!
//! Both the request and the response side carry headers in a fixed-capacity
//! table. Entries pushed after the table is full are dropped without error;
//! the table still counts them so callers can tell how many were offered.

/// Longest header name or value kept, in bytes. Longer fields are cut on a
/// char boundary.
pub const MAX_HEADER_FIELD_LEN: usize = 255;

/// Ordered name/value pairs with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<(String, String)>,
    capacity: usize,
    attempted: usize,
    max_field_len: usize,
}

impl HeaderTable {
    /// Creates an empty table that stores at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            attempted: 0,
            max_field_len: MAX_HEADER_FIELD_LEN,
        }
    }

    /// Overrides the per-field byte limit.
    pub fn with_field_limit(mut self, max_field_len: usize) -> Self {
        self.max_field_len = max_field_len;
        self
    }

    /// Offers an entry to the table.
    ///
    /// Returns `false` when the entry was dropped because the table is full.
    /// The attempt is counted either way.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.attempted += 1;
        if self.entries.len() >= self.capacity {
            return false;
        }
        let name = truncate_field(name.into(), self.max_field_len);
        let value = truncate_field(value.into(), self.max_field_len);
        self.entries.push((name, value));
        true
    }

    /// Number of entries actually stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries offered, including the dropped ones.
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if at least one entry was dropped.
    pub fn is_truncated(&self) -> bool {
        self.attempted > self.entries.len()
    }

    /// Case-insensitive lookup of the first entry named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn truncate_field(mut field: String, max_len: usize) -> String {
    if field.len() > max_len {
        let mut end = max_len;
        while !field.is_char_boundary(end) {
            end -= 1;
        }
        field.truncate(end);
    }
    field
}
