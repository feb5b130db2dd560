// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping between attribute entries and SQLite's dynamic values.

use lightmeter_core::ResultEntry;
use rusqlite::types::Value;

pub fn entry_to_value(entry: &ResultEntry) -> Value {
    match entry {
        ResultEntry::None => Value::Null,
        ResultEntry::Text(s) => Value::Text(s.clone()),
        ResultEntry::Blob(b) => Value::Blob(b.clone()),
        ResultEntry::Int64(v) => Value::Integer(*v),
        ResultEntry::Float64(v) => Value::Real(*v),
    }
}

pub fn value_to_entry(value: Value) -> ResultEntry {
    match value {
        Value::Null => ResultEntry::None,
        Value::Text(s) => ResultEntry::Text(s),
        Value::Blob(b) => ResultEntry::Blob(b),
        Value::Integer(v) => ResultEntry::Int64(v),
        Value::Real(v) => ResultEntry::Float64(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_maps_to_its_storage_class() {
        let entries = [
            ResultEntry::None,
            ResultEntry::Text("a".into()),
            ResultEntry::Blob(vec![1, 2, 3, 4]),
            ResultEntry::Int64(-7),
            ResultEntry::Float64(0.25),
        ];
        for entry in entries {
            assert_eq!(value_to_entry(entry_to_value(&entry)), entry);
        }
    }
}
