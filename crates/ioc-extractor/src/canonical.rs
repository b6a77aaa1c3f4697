//! Canonicalization rules for deduplication (spec §4.C).

use security_common::model::IocType;

/// Lowercase domains, URLs, emails, and hex hashes; everything else is
/// compared as-is.
pub fn canonicalize(ioc_type: IocType, raw: &str) -> String {
    match ioc_type {
        IocType::Domain | IocType::Url | IocType::Email
        | IocType::Md5 | IocType::Sha1 | IocType::Sha256 | IocType::Sha512 => raw.to_lowercase(),
        _ => raw.to_string(),
    }
}
