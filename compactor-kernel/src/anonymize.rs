/**
 * ANONYMIZER - pseudonymization of trace fields before release
 *
 * ROLE:
 * Two independent transforms applied to trace records:
 * - Masker      : salted keyed hash, hex(digest(salt || value)), optionally truncated
 * - OrdinalMask : value -> 0-based rank among the distinct values of the trace
 *
 * PROPERTIES:
 * - deterministic within a run (same salt, same input -> same output)
 * - equal inputs stay equal and distinct inputs stay distinct, except for
 *   the raw/debug method when truncation is configured
 * - the same salt must be reused across instance and machine traces when host
 *   names have to be cross-referenced downstream
 */

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub const GENERATED_SALT_LEN: usize = 32;

/// Masking presets selectable from config/CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MaskingMethod {
    /// Passthrough, debugging only.
    #[serde(rename = "none")]
    None,
    /// Salted SHA-1, untruncated. Legacy.
    #[serde(rename = "sha1-raw")]
    Sha1Raw,
    /// Salted SHA-256 truncated to 32 hex digits.
    #[default]
    #[serde(rename = "sha2-salted")]
    Sha2Salted,
}

impl MaskingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskingMethod::None => "none",
            MaskingMethod::Sha1Raw => "sha1-raw",
            MaskingMethod::Sha2Salted => "sha2-salted",
        }
    }

    pub fn digest(&self) -> DigestMethod {
        match self {
            MaskingMethod::None => DigestMethod::Raw,
            MaskingMethod::Sha1Raw => DigestMethod::Sha1,
            MaskingMethod::Sha2Salted => DigestMethod::Sha256,
        }
    }

    pub fn default_truncate(&self) -> Option<usize> {
        match self {
            MaskingMethod::Sha2Salted => Some(32),
            _ => None,
        }
    }

    pub fn is_salted(&self) -> bool {
        !matches!(self, MaskingMethod::None)
    }
}

impl fmt::Display for MaskingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaskingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MaskingMethod::None),
            "sha1-raw" => Ok(MaskingMethod::Sha1Raw),
            "sha2-salted" => Ok(MaskingMethod::Sha2Salted),
            other => Err(format!("unknown masking method '{other}' (none, sha1-raw, sha2-salted)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMethod {
    Raw,
    Sha1,
    Sha256,
    Sha512,
}

#[derive(Clone)]
pub struct Masker {
    method: DigestMethod,
    salt: Vec<u8>,
    truncate: Option<usize>,
}

impl fmt::Debug for Masker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the salt
        f.debug_struct("Masker")
            .field("method", &self.method)
            .field("salt_len", &self.salt.len())
            .field("truncate", &self.truncate)
            .finish()
    }
}

impl Masker {
    pub fn new(method: DigestMethod, salt: impl Into<Vec<u8>>, truncate: Option<usize>) -> Self {
        Self {
            method,
            salt: salt.into(),
            truncate,
        }
    }

    /// Masker with a fresh 256-bit salt. Output can not be correlated with
    /// any other run.
    pub fn with_generated_salt(method: DigestMethod, truncate: Option<usize>) -> Self {
        Self::new(method, generate_salt(), truncate)
    }

    pub fn raw() -> Self {
        Self::new(DigestMethod::Raw, Vec::new(), None)
    }

    pub fn method(&self) -> DigestMethod {
        self.method
    }

    pub fn mask(&self, value: &str) -> String {
        let masked = match self.method {
            DigestMethod::Raw => value.to_string(),
            DigestMethod::Sha1 => keyed_digest::<Sha1>(&self.salt, value),
            DigestMethod::Sha256 => keyed_digest::<Sha256>(&self.salt, value),
            DigestMethod::Sha512 => keyed_digest::<Sha512>(&self.salt, value),
        };
        match self.truncate {
            Some(len) => masked.chars().take(len).collect(),
            None => masked,
        }
    }

    /// Null and empty values become an empty string without being hashed.
    pub fn mask_value(&self, value: &Value) -> Value {
        match value {
            Value::Null => Value::String(String::new()),
            Value::String(s) if s.is_empty() => Value::String(String::new()),
            Value::String(s) => Value::String(self.mask(s)),
            other => Value::String(self.mask(&other.to_string())),
        }
    }
}

fn keyed_digest<D: Digest>(salt: &[u8], value: &str) -> String {
    let mut hasher = D::new();
    hasher.update(salt);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; GENERATED_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Rank masking for semi-identifying categorical values (rack labels...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrdinalMask {
    ranks: BTreeMap<OrdinalKey, usize>,
}

impl OrdinalMask {
    /// Ranks are assigned over the sorted distinct non-null values.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let distinct: BTreeSet<OrdinalKey> = values.into_iter().filter_map(OrdinalKey::of).collect();
        let ranks = distinct
            .into_iter()
            .enumerate()
            .map(|(rank, value)| (value, rank))
            .collect();
        Self { ranks }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Unknown or null values map to null.
    pub fn rank(&self, value: &Value) -> Value {
        OrdinalKey::of(value)
            .and_then(|key| self.ranks.get(&key).copied())
            .map(Value::from)
            .unwrap_or(Value::Null)
    }
}

/// Typed sort key: booleans, then numbers (numeric order), then strings,
/// then arrays/objects by their JSON text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum OrdinalKey {
    Bool(bool),
    Number(NumberKey),
    Text(String),
    Nested(String),
}

impl OrdinalKey {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(OrdinalKey::Bool(*b)),
            Value::Number(n) => Some(match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => OrdinalKey::Number(NumberKey::Int(i.into())),
                (_, Some(u), _) => OrdinalKey::Number(NumberKey::Int(u.into())),
                (_, _, Some(f)) => OrdinalKey::Number(NumberKey::Float(f)),
                _ => OrdinalKey::Nested(n.to_string()),
            }),
            Value::String(s) => Some(OrdinalKey::Text(s.clone())),
            other => Some(OrdinalKey::Nested(other.to_string())),
        }
    }
}

/// Integers and floats share one numeric order; `1` sorts just before `1.0`
/// so the two stay distinct.
#[derive(Debug, Clone, Copy)]
enum NumberKey {
    Int(i128),
    Float(f64),
}

impl Ord for NumberKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (NumberKey::Int(a), NumberKey::Int(b)) => a.cmp(b),
            (NumberKey::Float(a), NumberKey::Float(b)) => a.total_cmp(b),
            (NumberKey::Int(a), NumberKey::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (NumberKey::Float(a), NumberKey::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
        }
    }
}

impl PartialOrd for NumberKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NumberKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NumberKey {}
