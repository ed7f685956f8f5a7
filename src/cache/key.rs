//! Deterministic cache key derivation.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Derives the cache key for one step execution.
///
/// The key is the SHA-256 hex digest of a canonical JSON document over
/// the operation identity (service + program), the parameter set, and
/// the content checksums of every input reference. Sorted maps make the
/// encoding canonical: the same logical execution always hashes the
/// same, and any parameter or input edit derives a fresh key.
#[must_use]
pub fn cache_key(
    service: &str,
    program: &str,
    parameters: &BTreeMap<String, serde_json::Value>,
    input_checksums: &[String],
) -> String {
    let mut checksums: Vec<&String> = input_checksums.iter().collect();
    checksums.sort();

    let canonical = serde_json::json!({
        "service": service,
        "program": program,
        "parameters": parameters,
        "input_checksums": checksums,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_key_is_stable() {
        let p = params(&[("rate", serde_json::json!(44100))]);
        let a = cache_key("svc", "sox", &p, &["abc".to_string()]);
        let b = cache_key("svc", "sox", &p, &["abc".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_checksum_order_is_irrelevant() {
        let p = BTreeMap::new();
        let a = cache_key("svc", "sox", &p, &["x".to_string(), "y".to_string()]);
        let b = cache_key("svc", "sox", &p, &["y".to_string(), "x".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameter_edit_changes_key() {
        let a = cache_key("svc", "sox", &params(&[("gain", serde_json::json!(1))]), &[]);
        let b = cache_key("svc", "sox", &params(&[("gain", serde_json::json!(2))]), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_input_edit_changes_key() {
        let p = BTreeMap::new();
        let a = cache_key("svc", "sox", &p, &["checksum-1".to_string()]);
        let b = cache_key("svc", "sox", &p, &["checksum-2".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_program_and_service_participate() {
        let p = BTreeMap::new();
        let a = cache_key("svc_a", "sox", &p, &[]);
        let b = cache_key("svc_b", "sox", &p, &[]);
        let c = cache_key("svc_a", "ffmpeg", &p, &[]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
