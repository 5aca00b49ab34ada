//! Shared access signatures
//!
//! Encoding of permission sets, service SAS signing for a single blob, and
//! recovery of the expiry from an issued token.

use crate::blob::models::Permission;
use crate::error::{Result, StowageError};
use crate::utils::datetime::{format_sas_timestamp, parse_sas_timestamp};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

/// Storage service version the signatures are produced for
pub const SAS_VERSION: &str = "2022-11-02";

/// Signed resource type for a single blob
const SIGNED_RESOURCE_BLOB: &str = "b";

/// Encode a permission set in the service's canonical order
pub fn permission_string(permissions: Permission) -> String {
    let mut encoded = String::new();
    for (flag, symbol) in [
        (Permission::READ, 'r'),
        (Permission::WRITE, 'w'),
        (Permission::DELETE, 'd'),
        (Permission::LIST, 'l'),
    ] {
        if permissions.contains(flag) {
            encoded.push(symbol);
        }
    }
    encoded
}

/// A service SAS grant scoped to one blob
#[derive(Debug, Clone)]
pub struct BlobSasGrant<'a> {
    pub account: &'a str,
    pub container: &'a str,
    pub blob: &'a str,
    pub permissions: Permission,
    pub expiry: DateTime<Utc>,
}

impl BlobSasGrant<'_> {
    fn canonicalized_resource(&self) -> String {
        format!("/blob/{}/{}/{}", self.account, self.container, self.blob)
    }

    /// String-to-sign for service SAS versions 2020-12-06 and later.
    ///
    /// Start, identifier, IP, protocol, snapshot time, encryption scope and
    /// the response header overrides are left empty.
    pub fn string_to_sign(&self) -> String {
        [
            permission_string(self.permissions),
            String::new(),
            format_sas_timestamp(self.expiry),
            self.canonicalized_resource(),
            String::new(),
            String::new(),
            String::new(),
            SAS_VERSION.to_string(),
            SIGNED_RESOURCE_BLOB.to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ]
        .join("\n")
    }

    /// Base64 HMAC-SHA256 of the string-to-sign
    pub fn signature(&self, key: &[u8]) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| StowageError::config(format!("Invalid signing key: {e}")))?;
        mac.update(self.string_to_sign().as_bytes());
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// URL-encoded query string carrying the grant and its signature
    pub fn to_query(&self, key: &[u8]) -> Result<String> {
        let signature = self.signature(key)?;
        Ok(url::form_urlencoded::Serializer::new(String::new())
            .append_pair("sv", SAS_VERSION)
            .append_pair("se", &format_sas_timestamp(self.expiry))
            .append_pair("sr", SIGNED_RESOURCE_BLOB)
            .append_pair("sp", &permission_string(self.permissions))
            .append_pair("sig", &signature)
            .finish())
    }
}

/// Read the absolute expiry (`se`) back out of a signed URI or bare query string
pub fn expiry_from_token(token: &str) -> Result<DateTime<Utc>> {
    let url = match Url::parse(token) {
        Ok(url) => url,
        Err(_) => Url::parse(&format!(
            "https://token.invalid/?{}",
            token.trim_start_matches('?')
        ))?,
    };

    let expiry = url
        .query_pairs()
        .find(|(key, _)| key == "se")
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| StowageError::invalid_argument("Token carries no expiry (se) parameter"))?;

    parse_sas_timestamp(&expiry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grant() -> BlobSasGrant<'static> {
        BlobSasGrant {
            account: "demo",
            container: "reports",
            blob: "report.pdf",
            permissions: Permission::READ | Permission::WRITE,
            expiry: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_permission_string_order() {
        assert_eq!(permission_string(Permission::NONE), "");
        assert_eq!(permission_string(Permission::LIST | Permission::READ), "rl");
        assert_eq!(
            permission_string(Permission::DELETE | Permission::WRITE | Permission::READ | Permission::LIST),
            "rwdl"
        );
    }

    #[test]
    fn test_string_to_sign_layout() {
        let string_to_sign = grant().string_to_sign();
        let fields: Vec<&str> = string_to_sign.split('\n').collect();

        assert_eq!(fields.len(), 16);
        assert_eq!(fields[0], "rw");
        assert_eq!(fields[2], "2030-01-01T00:00:00Z");
        assert_eq!(fields[3], "/blob/demo/reports/report.pdf");
        assert_eq!(fields[7], SAS_VERSION);
        assert_eq!(fields[8], "b");
    }

    #[test]
    fn test_signature_is_known_hmac() {
        let signature = grant().signature(b"key").unwrap();
        assert_eq!(signature, "Otwnr+5sODiLBmv1iXGFMdKGp17sQUeDR59gbKkSu0M=");
    }

    #[test]
    fn test_query_roundtrips_expiry() {
        let query = grant().to_query(b"key").unwrap();
        assert!(query.starts_with("sv=2022-11-02&se=2030-01-01T00%3A00%3A00Z&sr=b&sp=rw&sig="));

        let token = format!("https://demo.blob.core.windows.net/reports/report.pdf?{query}");
        assert_eq!(expiry_from_token(&token).unwrap(), grant().expiry);
        assert_eq!(expiry_from_token(&query).unwrap(), grant().expiry);
    }

    #[test]
    fn test_expiry_from_token_without_se() {
        let err = expiry_from_token("https://demo.blob.core.windows.net/a/b?sv=2022-11-02").unwrap_err();
        assert!(matches!(err, StowageError::InvalidArgument(_)));
    }
}
