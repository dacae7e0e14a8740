pub mod canonical;
pub mod hmac;

pub use self::canonical::canonicalize;
pub use self::hmac::{
    constant_time_eq, hmac_sha256_hex, sign_payload, verify_signature, SigningError,
};
