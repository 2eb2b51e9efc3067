//! Client side of the Cognito `USER_SRP_AUTH` password verifier.
//!
//! Cognito runs SRP-6a over the RFC 5054 3072-bit group with SHA-256, and
//! derives the session key with HKDF using the info string
//! `"Caldera Derived Key"`. Byte strings are built from hex with Cognito's
//! padding rule: an odd-length value gains a leading `0`, and a value whose
//! top bit is set gains a leading `00` so it never reads as negative.
//!
//! All of this is CPU-bound; callers on an async runtime should run
//! [`SrpClient::new`] and [`SrpClient::process_challenge`] on the blocking
//! pool.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, UtcOffset};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// RFC 5054 3072-bit group prime.
const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);
const G_HEX: &str = "2";
const DERIVED_KEY_INFO: &[u8] = b"Caldera Derived Key";
const DERIVED_KEY_LEN: usize = 16;
const SMALL_A_BYTES: usize = 128;

/// Parameters of a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PasswordVerifierChallenge {
    /// Salt, hex encoded.
    pub salt: String,
    /// Server public value B, hex encoded.
    pub srp_b: String,
    /// Opaque base64 blob echoed back in the response.
    pub secret_block: String,
    /// Internal user id the verifier was registered under.
    pub user_id_for_srp: String,
}

/// Responses answering a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PasswordVerifierResponses {
    pub timestamp: String,
    pub username: String,
    pub password_claim_secret_block: String,
    pub password_claim_signature: String,
}

/// One SRP exchange. Holds the ephemeral private value `a`, so a client
/// must not be reused across authentication attempts.
pub struct SrpClient {
    pool_name: String,
    big_n: BigUint,
    g: BigUint,
    k: BigUint,
    small_a: BigUint,
    large_a: BigUint,
}

impl fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpClient")
            .field("pool_name", &self.pool_name)
            .field("large_a", &self.large_a_hex())
            .finish_non_exhaustive()
    }
}

impl SrpClient {
    /// Start an exchange for the given user pool (`<region>_<name>`) with a
    /// fresh random private value.
    pub fn new(pool_id: &str) -> Result<Self> {
        let mut bytes = [0u8; SMALL_A_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self::with_private_value(pool_id, BigUint::from_bytes_be(&bytes))
    }

    /// Start an exchange with a caller-chosen private value.
    pub fn with_private_value(pool_id: &str, small_a: BigUint) -> Result<Self> {
        let pool_name = pool_id
            .split_once('_')
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::invalid_config(format!("malformed user pool id '{pool_id}'")))?;

        let big_n = hex_to_biguint(N_HEX)?;
        let g = hex_to_biguint(G_HEX)?;
        let k = hex_to_biguint(&hex_hash(&format!("00{N_HEX}0{G_HEX}"))?)?;
        let small_a = small_a % &big_n;
        let large_a = g.modpow(&small_a, &big_n);
        if large_a.is_zero() {
            return Err(Error::authentication("SRP public value A is zero"));
        }

        Ok(Self {
            pool_name: pool_name.to_string(),
            big_n,
            g,
            k,
            small_a,
            large_a,
        })
    }

    /// Public value A as sent in `SRP_A`.
    pub fn large_a_hex(&self) -> String {
        self.large_a.to_str_radix(16)
    }

    /// Derive the 16-byte password authentication key.
    pub fn password_authentication_key(
        &self,
        user_id: &str,
        password: &str,
        server_b: &BigUint,
        salt_hex: &str,
    ) -> Result<[u8; DERIVED_KEY_LEN]> {
        if (server_b % &self.big_n).is_zero() {
            return Err(Error::authentication("SRP server value B is zero mod N"));
        }
        let u = compute_u(&self.large_a, server_b)?;
        if u.is_zero() {
            return Err(Error::authentication("SRP scrambling parameter u is zero"));
        }
        let x = compute_x(&self.pool_name, user_id, password, salt_hex)?;

        let g_x = self.g.modpow(&x, &self.big_n);
        let k_g_x = (&self.k * g_x) % &self.big_n;
        let base = ((server_b % &self.big_n) + &self.big_n - k_g_x) % &self.big_n;
        let exponent = &self.small_a + &u * &x;
        let s = base.modpow(&exponent, &self.big_n);

        derive_key(&s, &u)
    }

    /// Answer a `PASSWORD_VERIFIER` challenge at the given timestamp
    /// (see [`format_timestamp`]).
    pub fn process_challenge(
        &self,
        challenge: &PasswordVerifierChallenge,
        password: &str,
        timestamp: &str,
    ) -> Result<PasswordVerifierResponses> {
        let server_b = hex_to_biguint(&challenge.srp_b)?;
        let key = self.password_authentication_key(
            &challenge.user_id_for_srp,
            password,
            &server_b,
            &challenge.salt,
        )?;

        let secret_block = STANDARD
            .decode(challenge.secret_block.as_bytes())
            .map_err(|e| Error::authentication_with("SECRET_BLOCK is not valid base64", e))?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
            .map_err(|e| Error::authentication_with("invalid HMAC key", e))?;
        mac.update(self.pool_name.as_bytes());
        mac.update(challenge.user_id_for_srp.as_bytes());
        mac.update(&secret_block);
        mac.update(timestamp.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(PasswordVerifierResponses {
            timestamp: timestamp.to_string(),
            username: challenge.user_id_for_srp.clone(),
            password_claim_secret_block: challenge.secret_block.clone(),
            password_claim_signature: signature,
        })
    }
}

/// Format a timestamp the way Cognito expects it in `TIMESTAMP`,
/// e.g. `Tue Mar 5 09:01:02 UTC 2024` (day of month unpadded).
pub fn format_timestamp(now: OffsetDateTime) -> Result<String> {
    let format = time::macros::format_description!(
        "[weekday repr:short] [month repr:short] [day padding:none] [hour]:[minute]:[second] UTC [year]"
    );
    now.to_offset(UtcOffset::UTC)
        .format(format)
        .map_err(|e| Error::authentication_with("failed to format SRP timestamp", e))
}

fn hex_to_biguint(hex: &str) -> Result<BigUint> {
    BigUint::parse_bytes(hex.as_bytes(), 16)
        .ok_or_else(|| Error::authentication(format!("invalid hex value '{hex}'")))
}

fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    hex::decode(hex).map_err(|e| Error::authentication_with("invalid hex value", e))
}

/// SHA-256 over the bytes a hex string encodes, as lowercase hex.
fn hex_hash(hex: &str) -> Result<String> {
    Ok(hex::encode(Sha256::digest(decode_hex(hex)?)))
}

fn pad_hex(hex: &str) -> String {
    if hex.len() % 2 == 1 {
        format!("0{hex}")
    } else if hex.starts_with(|c: char| "89ABCDEFabcdef".contains(c)) {
        format!("00{hex}")
    } else {
        hex.to_string()
    }
}

fn pad_biguint(value: &BigUint) -> String {
    pad_hex(&value.to_str_radix(16))
}

fn compute_u(large_a: &BigUint, large_b: &BigUint) -> Result<BigUint> {
    hex_to_biguint(&hex_hash(&format!(
        "{}{}",
        pad_biguint(large_a),
        pad_biguint(large_b)
    ))?)
}

fn compute_x(pool_name: &str, user_id: &str, password: &str, salt_hex: &str) -> Result<BigUint> {
    let identity = hex::encode(Sha256::digest(format!("{pool_name}{user_id}:{password}")));
    hex_to_biguint(&hex_hash(&format!("{}{identity}", pad_hex(salt_hex)))?)
}

fn derive_key(s: &BigUint, u: &BigUint) -> Result<[u8; DERIVED_KEY_LEN]> {
    let ikm = decode_hex(&pad_biguint(s))?;
    let salt = decode_hex(&pad_biguint(u))?;
    let mut okm = [0u8; DERIVED_KEY_LEN];
    Hkdf::<Sha256>::new(Some(&salt), &ikm)
        .expand(DERIVED_KEY_INFO, &mut okm)
        .map_err(|e| Error::authentication(format!("HKDF expansion failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    const POOL_ID: &str = "eu-central-1_8IPEVy8kc";
    const USER_ID: &str = "3f9c2a7e-1111-2222-3333-444455556666";
    const PASSWORD: &str = "correct horse battery staple";
    const SALT: &str = "8f1e2d3c4b5a69788796a5b4c3d2e1f0";
    const SERVER_B: &str = concat!(
        "958f208860e2d93851bc0b6167f8f05385981cfc22afd7e271336377c2ff05f5",
        "99db05831fcf81f4e7a01f76c6b6446499c734bef625079a28451743955b2d36",
        "67f8f43110193745ed04c424d3b96dcbba83ddc11b6b04bbff781cf34cbaea73",
        "1a4c4d4088a87e6a14db5bd39ce3fd5bca02f59da2bd6931a443f910210bd137",
        "01ca26d1309e5317c71a75bfb9720288db622a188cf28c6fbb973b992061c1c2",
        "e52703535c48b2757c755c9431a918ae1ac549ace6d0818f49f9ebabc44b751f",
        "261a8ecb8ddd29ba2ce227a392e44475d8c3f1a3514a4f03881e949056eaa272",
        "67f012dd39ed750867aa7e1e332eeaa060d8748dec34706c13b587f89da9ae9a",
        "97a2d17c4ff59556b6abbca2e1c11bf3a669d081aaeeb2edd47c9d167762681b",
        "646924ea2f9b06e7722b32844241f6f2ebcebbe6984b37ac4ddf2ae7d63749e9",
        "896ff59d192ca6a5a63a713e56cc9af7824e29e1f09459569a0ea3533ed914cf",
        "0404a656b1230a66e2756a98f07951b11236ed3340aa7ad3115ead40723ac763",
    );

    fn fixed_client() -> SrpClient {
        SrpClient::with_private_value(POOL_ID, BigUint::from_bytes_be(&[0x5f; 64])).unwrap()
    }

    #[test]
    fn test_multiplier_k() {
        let client = fixed_client();
        assert_eq!(
            client.k.to_str_radix(16),
            "538282c4354742d7cbbde2359fcf67f9f5b3a6b08791e5011b43b8a5b66d9ee6"
        );
    }

    #[test]
    fn test_pad_hex_rules() {
        assert_eq!(pad_hex("abc"), "0abc");
        assert_eq!(pad_hex("8f00"), "008f00");
        assert_eq!(pad_hex("7f00"), "7f00");
        assert_eq!(pad_hex("F0"), "00F0");
        assert_eq!(pad_biguint(&BigUint::zero()), "00");
    }

    #[test]
    fn test_known_vector() {
        let client = fixed_client();
        let a_hex = client.large_a_hex();
        assert_eq!(a_hex.len(), 768);
        assert!(a_hex.starts_with("ba57c1a0a73a73a60406af9d3cc0a257"));

        let server_b = hex_to_biguint(SERVER_B).unwrap();
        let key = client
            .password_authentication_key(USER_ID, PASSWORD, &server_b, SALT)
            .unwrap();
        assert_eq!(hex::encode(key), "ca4b8f7bade8402f1ad3d9c9051db2c6");

        let challenge = PasswordVerifierChallenge {
            salt: SALT.to_string(),
            srp_b: SERVER_B.to_string(),
            secret_block: STANDARD.encode(b"opaque-secret-block-from-cognito"),
            user_id_for_srp: USER_ID.to_string(),
        };
        let responses = client
            .process_challenge(&challenge, PASSWORD, "Tue Mar 5 09:01:02 UTC 2024")
            .unwrap();
        assert_eq!(
            responses.password_claim_signature,
            "5pGgND6n9E5TKvBnF+wYhwJZOubgLH3cE/WB0oz2zUU="
        );
        assert_eq!(responses.username, USER_ID);
        assert_eq!(
            responses.password_claim_secret_block,
            "b3BhcXVlLXNlY3JldC1ibG9jay1mcm9tLWNvZ25pdG8="
        );
    }

    #[test]
    fn test_client_and_server_agree_on_key() {
        let client = SrpClient::new(POOL_ID).unwrap();
        let n = &client.big_n;
        let g = &client.g;

        // Server side: verifier v = g^x, B = k*v + g^b, S = (A * v^u)^b.
        let x = compute_x(&client.pool_name, USER_ID, PASSWORD, SALT).unwrap();
        let v = g.modpow(&x, n);
        let b = BigUint::from_bytes_be(&[0x3c; 32]);
        let server_b = (&client.k * &v + g.modpow(&b, n)) % n;
        let u = compute_u(&client.large_a, &server_b).unwrap();
        let server_s = ((&client.large_a * v.modpow(&u, n)) % n).modpow(&b, n);
        let server_key = derive_key(&server_s, &u).unwrap();

        let client_key = client
            .password_authentication_key(USER_ID, PASSWORD, &server_b, SALT)
            .unwrap();
        assert_eq!(client_key, server_key);

        let wrong = client
            .password_authentication_key(USER_ID, "wrong password", &server_b, SALT)
            .unwrap();
        assert_ne!(wrong, server_key);
    }

    #[test]
    fn test_rejects_degenerate_server_value() {
        let client = fixed_client();
        let err = client
            .password_authentication_key(USER_ID, PASSWORD, &client.big_n.clone(), SALT)
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_malformed_pool_id() {
        assert!(matches!(
            SrpClient::new("no-underscore"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(
            format_timestamp(datetime!(2024-03-05 09:01:02 UTC)).unwrap(),
            "Tue Mar 5 09:01:02 UTC 2024"
        );
        assert_eq!(
            format_timestamp(datetime!(2024-12-15 23:59:59 +01:00)).unwrap(),
            "Sun Dec 15 22:59:59 UTC 2024"
        );
    }

    proptest! {
        #[test]
        fn prop_padded_value_is_positive_and_lossless(bytes in proptest::collection::vec(any::<u8>(), 1..64)) {
            let value = BigUint::from_bytes_be(&bytes);
            let decoded = decode_hex(&pad_biguint(&value)).unwrap();
            prop_assert!(decoded[0] < 0x80);
            prop_assert_eq!(BigUint::from_bytes_be(&decoded), value);
        }
    }
}
