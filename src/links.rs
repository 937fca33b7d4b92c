//! Token and slug generation for referral links.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::domain::fields::{LinkInfo, Referral};

pub const SLUG_LEN: usize = 10;
const TOKEN_ENTROPY_BYTES: usize = 16;

/// Produces the private token, the public slug and the shareable URL for a
/// referral.
pub trait LinkGenerator: Send + Sync {
    fn generate(&self, referral: &Referral, now: OffsetDateTime) -> LinkInfo;
}

pub struct SecureLinkGenerator {
    base_url: String,
}

impl SecureLinkGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// `<referral id as hex>-<16 random bytes, url-safe base64>`
    fn secure_token(referral: &Referral) -> String {
        let mut entropy = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut entropy);
        format!("{}-{}", referral.id.simple(), URL_SAFE_NO_PAD.encode(entropy))
    }

    fn slug(referral: &Referral, now: OffsetDateTime) -> String {
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        let input = format!("{}-{}-{}", referral.referral_code, referral.id, millis);
        let hash = Sha256::digest(input.as_bytes());

        let mut slug = URL_SAFE_NO_PAD.encode(hash);
        slug.truncate(SLUG_LEN);
        slug
    }
}

impl LinkGenerator for SecureLinkGenerator {
    fn generate(&self, referral: &Referral, now: OffsetDateTime) -> LinkInfo {
        let token = Self::secure_token(referral);
        let slug = Self::slug(referral, now);
        let url = format!("{}{}", self.base_url, slug);

        LinkInfo { url, token, slug }
    }
}
