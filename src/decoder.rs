//! Rebuilds nested documents from flat `/`-delimited key/value listings.
//!
//! `instances/i-1/services/LB/port = 80` becomes
//! `{"instances": {"i-1": {"services": {"LB": {"port": "80"}}}}}`.
//! Keys ending in `/` are folders and produce empty objects.  A key that is
//! both a value and a parent of other keys is a structural conflict and is
//! rejected regardless of the order the keys arrive in.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::KvPair;
use crate::types::{Service, ServiceSet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("key {key} is both a value and a parent of other keys")]
    Conflict { key: String },

    #[error("value of {key} is not valid UTF-8")]
    NotUtf8 { key: String },

    #[error("expected an object at {path}")]
    NotAnObject { path: String },
}

/// Builds the nested document for a set of pairs.
pub fn decode(pairs: &[KvPair]) -> Result<Value, DecodeError> {
    let mut root = Map::new();
    for pair in pairs {
        insert(&mut root, pair)?;
    }
    Ok(Value::Object(root))
}

fn insert(root: &mut Map<String, Value>, pair: &KvPair) -> Result<(), DecodeError> {
    let is_folder = pair.key.ends_with('/');
    let segments: Vec<&str> = pair.key.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };

    let conflict = || DecodeError::Conflict {
        key: pair.key.clone(),
    };

    let mut node = root;
    for segment in parents {
        let child = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        node = child.as_object_mut().ok_or_else(conflict)?;
    }

    if is_folder {
        let child = node
            .entry(last.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            return Err(conflict());
        }
        return Ok(());
    }

    let value = match &pair.value {
        Some(bytes) => String::from_utf8(bytes.clone()).map_err(|_| DecodeError::NotUtf8 {
            key: pair.key.clone(),
        })?,
        None => String::new(),
    };
    if node.contains_key(*last) {
        return Err(conflict());
    }
    node.insert(last.to_string(), Value::String(value));
    Ok(())
}

/// Looks up `instances.<instance_id>.services`.
///
/// Absent anywhere along the path means no services; present but not an
/// object is an error.
pub fn services_document<'a>(
    doc: &'a Value,
    instance_id: &str,
) -> Result<Option<&'a Map<String, Value>>, DecodeError> {
    lookup(doc, &["instances", instance_id, "services"])
}

/// The desired service set for an instance.
pub fn desired_services(doc: &Value, instance_id: &str) -> Result<ServiceSet, DecodeError> {
    Ok(services_document(doc, instance_id)?
        .map(|services| services.keys().map(|name| Service::new(name.as_str())).collect())
        .unwrap_or_default())
}

/// The config sub-document of one service, if present.
pub fn service_config<'a>(
    doc: &'a Value,
    instance_id: &str,
    service: &Service,
) -> Result<Option<&'a Value>, DecodeError> {
    Ok(services_document(doc, instance_id)?.and_then(|services| services.get(service.as_str())))
}

fn lookup<'a>(doc: &'a Value, path: &[&str]) -> Result<Option<&'a Map<String, Value>>, DecodeError> {
    let mut node = doc;
    for (depth, segment) in path.iter().enumerate() {
        let object = node.as_object().ok_or_else(|| DecodeError::NotAnObject {
            path: path[..depth].join("."),
        })?;
        match object.get(*segment) {
            Some(child) => node = child,
            None => return Ok(None),
        }
    }
    node.as_object().map(Some).ok_or_else(|| DecodeError::NotAnObject {
        path: path.join("."),
    })
}
