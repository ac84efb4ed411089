//! Helpers for the identifier formats used across the APS APIs.
//!
//! The Data Management API addresses hubs and projects with a `b.` prefix, while the ACC Admin
//! API expects the bare GUID. Lineage and version URNs show up in URL path segments
//! (percent-encoded) and in Model Derivative paths (URL-safe base64, unpadded).

use base64::prelude::*;

/// Remove the `b.` prefix from a hub or project ID, if present.
pub fn strip_b_prefix(id: &str) -> &str {
    id.strip_prefix("b.").unwrap_or(id)
}

/// Make sure a hub or project ID carries the `b.` prefix.
///
/// An empty ID stays empty.
pub fn ensure_b_prefix(id: &str) -> String {
    if id.is_empty() || id.starts_with("b.") {
        id.to_string()
    } else {
        format!("b.{id}")
    }
}

/// Percent-encode a URN so it can be used as a single path segment.
pub fn encode_urn(urn: &str) -> String {
    urlencoding::encode(urn).into_owned()
}

/// Encode a URN the way the Model Derivative API expects it: URL-safe base64 without padding.
pub fn safe_b64encode(value: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(value)
}

pub fn is_urn(id: &str) -> bool {
    id.starts_with("urn:")
}

/// Is this a URN minted by Autodesk (as opposed to a file name)?
pub fn is_adsk_urn(id: &str) -> bool {
    id.starts_with("urn:adsk")
}

/// Does this URN point at a specific version of a file?
pub fn is_version_urn(id: &str) -> bool {
    id.contains("fs.file") || id.contains("version=")
}

/// Does this URN point at a file lineage (all versions of a document)?
pub fn is_lineage_urn(id: &str) -> bool {
    id.contains("lineage")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_b_prefix() {
        assert_eq!(strip_b_prefix("b.1234"), "1234");
        assert_eq!(strip_b_prefix("1234"), "1234");
        assert_eq!(strip_b_prefix("ab.12"), "ab.12");

        assert_eq!(ensure_b_prefix("1234"), "b.1234");
        assert_eq!(ensure_b_prefix("b.1234"), "b.1234");
        assert_eq!(ensure_b_prefix(""), "");
    }

    #[test]
    fn test_encode_urn() {
        assert_eq!(
            encode_urn("urn:adsk.wipprod:fs.folder:co.abc"),
            "urn%3Aadsk.wipprod%3Afs.folder%3Aco.abc"
        );
        assert_eq!(encode_urn("a/b?c=d~e_f-g"), "a%2Fb%3Fc%3Dd~e_f-g");
        assert_eq!(encode_urn(""), "");
    }

    #[test]
    fn test_safe_b64encode() {
        // Standard base64 would produce `+`, `/` and `=` padding here.
        let urn = "urn:adsk.wipprod:fs.file:vf.abc?version=1";
        let encoded = safe_b64encode(urn);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(
            BASE64_URL_SAFE_NO_PAD.decode(&encoded).unwrap(),
            urn.as_bytes()
        );
        assert_eq!(safe_b64encode(""), "");
        assert_eq!(safe_b64encode("a"), "YQ");
    }

    #[test]
    fn test_urn_kinds() {
        let lineage = "urn:adsk.wipprod:dm.lineage:abc";
        let version = "urn:adsk.wipprod:fs.file:vf.abc?version=2";

        assert!(is_adsk_urn(lineage));
        assert!(is_lineage_urn(lineage));
        assert!(!is_version_urn(lineage));

        assert!(is_version_urn(version));
        assert!(!is_lineage_urn(version));

        assert!(!is_urn("Tower.rvt"));
        assert!(!is_adsk_urn("urn:other:thing"));
        assert!(is_urn("urn:other:thing"));
    }
}
