//! Rotation key generation for the identity ceremony

use std::fmt;

use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use serde::Serialize;

/// Multicodec prefix for a compressed secp256k1 public key (0xe7, varint encoded)
const SECP256K1_PUB_MULTICODEC: [u8; 2] = [0xe7, 0x01];
/// Multicodec prefix for a secp256k1 private key (0x1301, varint encoded)
const SECP256K1_PRIV_MULTICODEC: [u8; 2] = [0x81, 0x26];

/// A freshly generated rotation keypair. Lives only in memory for one ceremony.
pub struct RotationKeyMaterial {
    signing_key: SigningKey,
}

impl RotationKeyMaterial {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// did:key form of the public half
    pub fn did_key(&self) -> String {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        let mut bytes = SECP256K1_PUB_MULTICODEC.to_vec();
        bytes.extend_from_slice(point.as_bytes());
        format!("did:key:z{}", bs58::encode(bytes).into_string())
    }

    /// Consume the keypair, producing the one-time export of the private half
    pub fn export(self) -> RecoveryKeyExport {
        let public_key = self.did_key();
        let secret = self.signing_key.to_bytes();

        let mut multibase = SECP256K1_PRIV_MULTICODEC.to_vec();
        multibase.extend_from_slice(&secret);

        RecoveryKeyExport {
            public_key,
            private_key_hex: hex::encode(secret),
            private_key_multibase: format!("z{}", bs58::encode(multibase).into_string()),
        }
    }
}

/// Private rotation key handed to the user. Deliberately not `Clone`.
#[derive(Serialize)]
pub struct RecoveryKeyExport {
    pub public_key: String,
    pub private_key_hex: String,
    pub private_key_multibase: String,
}

impl fmt::Debug for RecoveryKeyExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryKeyExport")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
