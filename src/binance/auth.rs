use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceAuth {
    api_key: String,
    api_secret: String,
}

impl BinanceAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self { api_key, api_secret }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// HMAC-SHA256 signature over the full query string, hex-encoded, as
    /// required for SIGNED futures endpoints.
    pub fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(query.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }
}
