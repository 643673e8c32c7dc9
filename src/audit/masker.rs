// Recursive sensitive-field redaction for audit logs

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Redaction marker written over sensitive values
pub const MASK: &str = "****";

/// Fallback sensitive-field set for values without a declaration
const DEFAULT_SENSITIVE_FIELDS: [&str; 5] =
    ["password", "access_token", "api_token", "hash", "email"];

/// Capability for producing an audit snapshot of a value
///
/// Commands and handler outputs implement this so the masker never has to
/// introspect domain types: the snapshot carries the JSON form together
/// with the sensitive-field declarations that govern each nesting level.
pub trait Auditable {
    fn audit_node(&self) -> AuditNode;
}

/// JSON snapshot of a value paired with its masking declarations
///
/// `declared` is the sensitive-field set of the value's own type; `None`
/// means the type declares nothing and the default set applies. Children
/// are nested object-valued fields whose types carry declarations of
/// their own; each child is masked by its own rules before the parent's
/// set sweeps the whole tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditNode {
    value: Value,
    declared: Option<Vec<String>>,
    children: Vec<(String, AuditNode)>,
}

impl AuditNode {
    /// Snapshot of a value whose type declares its own sensitive set
    /// (possibly empty)
    pub fn declared(value: Value, fields: &[&str]) -> Self {
        Self {
            value,
            declared: Some(fields.iter().map(|f| f.to_string()).collect()),
            children: Vec::new(),
        }
    }

    /// Snapshot of a value with no declaration of its own
    pub fn bare(value: Value) -> Self {
        Self { value, declared: None, children: Vec::new() }
    }

    /// Attach the snapshot of a nested object-valued field that carries
    /// its own declaration
    pub fn with_child(mut self, field: &str, child: AuditNode) -> Self {
        self.children.push((field.to_string(), child));
        self
    }

    /// The raw (unmasked) JSON form; never hand this to a log sink
    pub fn raw(&self) -> &Value {
        &self.value
    }
}

/// Request-scoped memoization of masked output
///
/// Keyed by a content fingerprint of the snapshot, so logging the same
/// value several times within one dispatch masks it once. Created per
/// request and dropped with it; there is no process-wide cache.
#[derive(Debug, Default)]
pub struct MaskCache {
    entries: HashMap<[u8; 32], Value>,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Recursively redacts sensitive fields from audit snapshots
///
/// Masking rules, applied per node:
/// 1. nested declared children first, each by its own set;
/// 2. on the result side, bearer-token-shaped strings are fully redacted
///    wherever they appear;
/// 3. the node's active set (declared, or the default fallback) sweeps
///    the whole tree: any matching key at any depth is replaced by the
///    marker.
#[derive(Debug, Clone)]
pub struct AuditMasker {
    default_fields: Vec<String>,
}

impl Default for AuditMasker {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditMasker {
    pub fn new() -> Self {
        Self {
            default_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Masker with a custom fallback set (tests, alternate deployments)
    pub fn with_default_fields(fields: &[&str]) -> Self {
        Self { default_fields: fields.iter().map(|f| f.to_string()).collect() }
    }

    /// Mask a command snapshot before it is logged
    pub fn mask_command(&self, node: &AuditNode, cache: &mut MaskCache) -> Value {
        self.mask_node(node, cache, false)
    }

    /// Mask a result snapshot; additionally redacts bearer-token-shaped
    /// strings, which carry a live secret regardless of field name
    pub fn mask_result(&self, node: &AuditNode, cache: &mut MaskCache) -> Value {
        self.mask_node(node, cache, true)
    }

    fn mask_node(&self, node: &AuditNode, cache: &mut MaskCache, result_side: bool) -> Value {
        let key = fingerprint(node, result_side);
        if let Some(hit) = cache.entries.get(&key) {
            return hit.clone();
        }

        let mut value = node.value.clone();

        for (field, child) in &node.children {
            if let Some(slot) = value.get_mut(field.as_str()) {
                *slot = self.mask_node(child, cache, result_side);
            }
        }

        if result_side {
            redact_token_shapes(&mut value);
        }

        let active = node.declared.as_ref().unwrap_or(&self.default_fields);
        sweep(&mut value, active);

        cache.entries.insert(key, value.clone());
        value
    }
}

/// Replace the value of any key in the active set, at any depth
fn sweep(value: &mut Value, fields: &[String]) {
    match value {
        Value::Object(map) => {
            for (key, slot) in map.iter_mut() {
                if fields.iter().any(|f| f == key) {
                    *slot = Value::String(MASK.to_string());
                } else {
                    sweep(slot, fields);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sweep(item, fields);
            }
        }
        _ => {}
    }
}

/// Redact every bearer-token-shaped string in the tree
fn redact_token_shapes(value: &mut Value) {
    match value {
        Value::String(s) => {
            if is_token_shaped(s) {
                *value = Value::String(MASK.to_string());
            }
        }
        Value::Object(map) => {
            for (_, slot) in map.iter_mut() {
                redact_token_shapes(slot);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_token_shapes(item);
            }
        }
        _ => {}
    }
}

/// Wire shape of an issued bearer credential: a decimal id, a pipe, then
/// an alphanumeric secret of at least 32 characters
pub fn is_token_shaped(s: &str) -> bool {
    match s.split_once('|') {
        Some((id, secret)) => {
            !id.is_empty()
                && id.bytes().all(|b| b.is_ascii_digit())
                && secret.len() >= 32
                && secret.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Stable content fingerprint of a snapshot for memoization
///
/// JSON object keys serialize in sorted order, so equal logical values
/// fingerprint equally.
fn fingerprint(node: &AuditNode, result_side: bool) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([result_side as u8]);
    hash_node(&mut hasher, node);
    hasher.finalize().into()
}

fn hash_node(hasher: &mut Sha256, node: &AuditNode) {
    hasher.update(node.value.to_string().as_bytes());
    match &node.declared {
        Some(fields) => {
            hasher.update([1u8]);
            for field in fields {
                hasher.update(field.as_bytes());
                hasher.update([0u8]);
            }
        }
        None => hasher.update([0u8]),
    }
    for (field, child) in &node.children {
        hasher.update(field.as_bytes());
        hash_node(hasher, child);
    }
}
