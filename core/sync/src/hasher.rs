//! Content fingerprinting for granular change detection.
//!
//! Properties are serialized to JSON with every object's keys sorted, then
//! hashed with 64-bit FNV-1a and rendered as 16 lowercase hex digits.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use exfig_remote::{Bounds, Color, Paint, RemoteDocument};

/// Fingerprint returned when properties cannot be serialized.
///
/// Never produced by a successful hash, so an item carrying it always
/// compares as changed.
pub const SENTINEL_FINGERPRINT: &str = "0000000000000000";

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Decimal places kept when normalizing floating point properties.
const FLOAT_SCALE: f64 = 1_000_000.0;

/// Round a float to the fixed hashing precision.
///
/// Negative zero collapses to zero so `-0.0` and `0.0` hash alike.
pub fn normalize_float(value: f64) -> f64 {
    let rounded = (value * FLOAT_SCALE).round() / FLOAT_SCALE;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Serialize `properties` to compact JSON with lexicographically sorted keys.
pub fn canonical_json<T: Serialize + ?Sized>(properties: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(properties)?;
    let mut out = String::new();
    write_canonical(&value, &mut out);
    Ok(out)
}

/// Stateless fingerprint calculator.
pub struct ContentHasher;

impl ContentHasher {
    /// Fingerprint an already-normalized property bag.
    ///
    /// Falls back to [`SENTINEL_FINGERPRINT`] if the bag cannot be serialized.
    pub fn hash<T: Serialize + ?Sized>(properties: &T) -> String {
        match canonical_json(properties) {
            Ok(canonical) => {
                let mut digest = fnv1a_64(canonical.as_bytes());
                if digest == 0 {
                    digest = FNV_OFFSET_BASIS;
                }
                format!("{:016x}", digest)
            }
            Err(e) => {
                warn!("Failed to canonicalize properties, forcing re-export: {}", e);
                SENTINEL_FINGERPRINT.to_string()
            }
        }
    }

    /// Fingerprint the visual properties of a remote node and its subtree.
    pub fn hash_document(document: &RemoteDocument) -> String {
        Self::hash(&HashableProperties::from_document(document))
    }

    pub fn is_sentinel(fingerprint: &str) -> bool {
        fingerprint == SENTINEL_FINGERPRINT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HashableColor {
    r: f64,
    g: f64,
    b: f64,
    a: f64,
}

impl From<&Color> for HashableColor {
    fn from(color: &Color) -> Self {
        Self {
            r: normalize_float(color.r),
            g: normalize_float(color.g),
            b: normalize_float(color.b),
            a: normalize_float(color.a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HashablePaint {
    #[serde(rename = "type")]
    paint_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<HashableColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opacity: Option<f64>,
}

impl HashablePaint {
    /// Hidden paints do not render and are dropped.
    fn from_paints(paints: &[Paint]) -> Vec<Self> {
        paints
            .iter()
            .filter(|p| p.visible)
            .map(|p| Self {
                paint_type: p.paint_type.clone(),
                color: p.color.as_ref().map(HashableColor::from),
                opacity: p.opacity.map(normalize_float),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HashableBounds {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl From<&Bounds> for HashableBounds {
    fn from(bounds: &Bounds) -> Self {
        Self {
            x: normalize_float(bounds.x),
            y: normalize_float(bounds.y),
            width: normalize_float(bounds.width),
            height: normalize_float(bounds.height),
        }
    }
}

/// Canonical, normalized view of a node's visual and semantic properties.
///
/// The node ID is deliberately absent: it is the key the fingerprint is
/// stored under. Optional text keeps `None` and `Some("")` distinct.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashableProperties {
    name: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    visible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    opacity: Option<f64>,
    fills: Vec<HashablePaint>,
    strokes: Vec<HashablePaint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stroke_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<HashableBounds>,
    children: Vec<HashableProperties>,
}

impl HashableProperties {
    pub fn from_document(document: &RemoteDocument) -> Self {
        Self {
            name: document.name.clone(),
            node_type: document.node_type.clone(),
            description: document.description.clone(),
            visible: document.visible,
            opacity: document.opacity.map(normalize_float),
            fills: HashablePaint::from_paints(&document.fills),
            strokes: HashablePaint::from_paints(&document.strokes),
            stroke_weight: document.stroke_weight.map(normalize_float),
            bounds: document.bounds.as_ref().map(HashableBounds::from),
            children: document.children.iter().map(Self::from_document).collect(),
        }
    }
}
