//! Deny-list filter applied to scraped email addresses before persistence.
//!
//! Rejects placeholder domains, no-reply style local parts, sentry/wixpress
//! protected forms, opaque hex local parts, and addresses that are really
//! image filenames. Input is lowercased and trimmed before matching.

use lazy_static::lazy_static;
use regex::Regex;

const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com",
    "example.org",
    "example.net",
    "domain.com",
    "yourdomain.com",
    "yourcompany.com",
    "email.com",
    "mysite.com",
    "website.com",
    "test.com",
];

const DENY_LOCAL_PREFIXES: &[&str] = &[
    "noreply@",
    "no-reply@",
    "no_reply@",
    "donotreply@",
    "do-not-reply@",
    "admin@",
    "administrator@",
    "webmaster@",
    "postmaster@",
    "hostmaster@",
    "abuse@",
    "mailer-daemon@",
];

lazy_static! {
    static ref HEX_LOCAL_PART: Regex =
        Regex::new(r"^[0-9a-f]{32,}@").unwrap();
    static ref IMAGE_EXTENSION: Regex =
        Regex::new(r"\.(png|jpg|jpeg|gif|webp|svg|ico|bmp)$").unwrap();
    static ref SENTRY_PROTECTED: Regex =
        Regex::new(r"@(sentry\.|.*\.sentry\.io$|.*sentry.*\.wixpress\.com$)").unwrap();
}

/// Whether an address survives the deny list.
pub fn is_valid_business_email(raw: &str) -> bool {
    let email = raw.trim().to_lowercase();

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return false;
    }

    if PLACEHOLDER_DOMAINS.contains(&domain) {
        return false;
    }
    if DENY_LOCAL_PREFIXES
        .iter()
        .any(|prefix| email.starts_with(prefix))
    {
        return false;
    }
    if HEX_LOCAL_PART.is_match(&email) {
        return false;
    }
    if IMAGE_EXTENSION.is_match(&email) {
        return false;
    }
    if SENTRY_PROTECTED.is_match(&email) || domain.ends_with("wixpress.com") {
        return false;
    }

    true
}

/// Lowercase, trim, and drop denied addresses, preserving order.
pub fn filter_emails<I, S>(emails: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    emails
        .into_iter()
        .filter_map(|raw| {
            let email = raw.as_ref().trim().to_lowercase();
            is_valid_business_email(&email).then_some(email)
        })
        .collect()
}
