use base64::Engine;

/// JWT token utilities
pub struct JwtUtils;

impl JwtUtils {
    /// Parse the `exp` claim without verifying the signature
    pub fn get_expiration(jwt: &str) -> Option<u64> {
        let mut parts = jwt.split('.');
        let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let payload: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
        payload.get("exp")?.as_u64()
    }
}
