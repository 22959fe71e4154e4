//! Decoding and application of result-frame patch batches.
//!
//! A result frame's `pl` is JSON text of `{ts, "~c", pl}`. When `~c` is truthy
//! the nested `pl` is base64 of a deflated JSON array of operations (zlib,
//! gzip or raw deflate framing), otherwise it is the array itself.

use std::io::Read;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::frame::ResultFrame;

/// Envelope carried in a result frame's `pl`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(rename = "~c", default)]
    pub compressed: Value,
    #[serde(default)]
    pub pl: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add {
        path: String,
        #[serde(default)]
        value: Value,
    },
    Replace {
        path: String,
        #[serde(default)]
        value: Value,
    },
    Remove {
        path: String,
    },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Replace { path, .. } | PatchOp::Remove { path } => {
                path
            }
        }
    }
}

/// Decode a result frame into its operation batch.
///
/// Never fails: a malformed payload is logged and yields an empty batch.
pub fn decode_result(frame: &ResultFrame) -> Vec<PatchOp> {
    match decode_payload(&frame.pl) {
        Ok(ops) => ops,
        Err(e) => {
            error!("failed to decode result mid={}: {e:#}", frame.mid);
            Vec::new()
        }
    }
}

fn decode_payload(text: &str) -> Result<Vec<PatchOp>> {
    let payload: ResultPayload =
        serde_json::from_str(text).context("result payload is not JSON")?;

    let ops = if is_truthy(&payload.compressed) {
        let encoded = payload
            .pl
            .as_str()
            .context("compressed payload is not a string")?;
        let raw = STANDARD
            .decode(encoded.trim())
            .context("compressed payload is not base64")?;
        let inflated = inflate(&raw)?;
        serde_json::from_str(&inflated).context("inflated payload is not JSON")?
    } else {
        payload.pl
    };

    let Value::Array(items) = ops else {
        bail!("operation batch is not an array");
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<PatchOp>(item.clone()) {
            Ok(op) => Some(op),
            Err(e) => {
                warn!("skipping unsupported operation {item}: {e}");
                None
            }
        })
        .collect())
}

/// Inflate `raw`, picking the decoder from its header.
fn inflate(raw: &[u8]) -> Result<String> {
    let mut inflated = String::new();
    let read = if is_zlib_header(raw) {
        ZlibDecoder::new(raw).read_to_string(&mut inflated)
    } else if raw.starts_with(&[0x1f, 0x8b]) {
        GzDecoder::new(raw).read_to_string(&mut inflated)
    } else {
        DeflateDecoder::new(raw).read_to_string(&mut inflated)
    };
    read.context("inflate failed")?;
    Ok(inflated)
}

/// RFC 1950: method 8 in the low nibble of CMF, and CMF/FLG a multiple of 31.
fn is_zlib_header(raw: &[u8]) -> bool {
    match raw {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Apply `ops` to `doc` in order. A failing operation is logged and skipped.
///
/// `add` is intentionally a no-op: upstream batches have always been applied
/// with replace/remove only.
pub fn apply_operations(doc: &mut Value, ops: &[PatchOp]) {
    for op in ops {
        if let Err(e) = apply_operation(doc, op) {
            error!("failed to apply operation {op:?}: {e:#}");
        }
    }
}

fn apply_operation(doc: &mut Value, op: &PatchOp) -> Result<()> {
    match op {
        PatchOp::Add { .. } => Ok(()),
        PatchOp::Replace { path, value } => set_path(doc, &compact_path(path), value.clone()),
        PatchOp::Remove { path } => unset_path(doc, &compact_path(path)),
    }
}

/// Split a slash-delimited path, dropping empty segments.
pub fn compact_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Most `null` slots a single set may append to an array.
const MAX_ARRAY_GROWTH: usize = 1024;

fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

fn empty_container_for(segment: &str) -> Value {
    if array_index(segment).is_some() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

/// Set `value` at `path`, creating or overwriting intermediate containers.
fn set_path(doc: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        bail!("empty path");
    };

    let mut cursor = doc;
    for (i, segment) in parents.iter().enumerate() {
        let next = path[i + 1];
        let child = child_slot(cursor, segment)?;
        if !child.is_object() && !child.is_array() {
            *child = empty_container_for(next);
        }
        cursor = child;
    }

    *child_slot(cursor, last)? = value;
    Ok(())
}

/// Mutable slot for `segment` under `container`, inserting `null` if absent.
fn child_slot<'a>(container: &'a mut Value, segment: &str) -> Result<&'a mut Value> {
    match container {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let Some(idx) = array_index(segment) else {
                bail!("cannot index array with '{segment}'");
            };
            if idx >= items.len() {
                let len = idx
                    .checked_add(1)
                    .filter(|len| len - items.len() <= MAX_ARRAY_GROWTH)
                    .with_context(|| {
                        format!("array index {idx} too far past length {}", items.len())
                    })?;
                items.resize(len, Value::Null);
            }
            Ok(&mut items[idx])
        }
        _ => bail!("cannot descend into scalar at '{segment}'"),
    }
}

/// Delete the field at `path`. Missing paths are a no-op; array slots are nulled.
fn unset_path(doc: &mut Value, path: &[&str]) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        bail!("empty path");
    };

    let mut cursor = doc;
    for segment in parents {
        let next = match cursor {
            Value::Object(map) => map.get_mut(*segment),
            Value::Array(items) => array_index(segment).and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match next {
            Some(child) => cursor = child,
            None => return Ok(()),
        }
    }

    match cursor {
        Value::Object(map) => {
            map.remove(*last);
        }
        Value::Array(items) => {
            if let Some(slot) = array_index(last).and_then(|i| items.get_mut(i)) {
                *slot = Value::Null;
            }
        }
        _ => {}
    }
    Ok(())
}
