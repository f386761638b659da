//! Credential Handling Fuzzing Tests
//!
//! Property-based tests over the password policy, secret generation and
//! token parsing. Hashing is expensive, so hash-based properties run only a
//! handful of cases.

use std::sync::Arc;

use proptest::prelude::*;
use taskd_auth::{
    KeyPair, PasswordPolicy, PolicyViolation, TokenCodec, TokenSettings,
    password::{SECRET_CHARSET, hash_secret, random_secret, verify_secret},
    validation::decode_header_algorithm,
};
use taskd_store::MemoryBackend;

fn codec() -> TokenCodec {
    let (_, keys) = KeyPair::generate().unwrap();
    let settings = TokenSettings {
        issuer: "taskd".into(),
        access_ttl: std::time::Duration::from_secs(1200),
        refresh_ttl: std::time::Duration::from_secs(86400),
        clock_skew: std::time::Duration::ZERO,
    };
    TokenCodec::new(Arc::new(keys), settings, Arc::new(MemoryBackend::new()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Any printable ASCII password within bounds is accepted
    #[test]
    fn fuzz_policy_accepts_printable_in_range(password in "[ -~]{8,128}") {
        prop_assert!(PasswordPolicy::new(8, 128).check(&password).is_ok());
    }

    /// Length is counted in characters and enforced on both ends
    #[test]
    fn fuzz_policy_length_bounds(password in "[a-z]{0,200}") {
        let result = PasswordPolicy::new(8, 128).check(&password);
        let in_range = (8..=128).contains(&password.len());
        prop_assert_eq!(result.is_ok(), in_range);
        if !in_range {
            let is_length_violation = matches!(result, Err(PolicyViolation::Length { .. }));
            prop_assert!(is_length_violation);
        }
    }

    /// Anything outside printable ASCII is refused regardless of length
    #[test]
    fn fuzz_policy_rejects_non_ascii(prefix in "[a-z]{8,20}", c in "[^ -~]") {
        let password = format!("{}{}", prefix, c);
        prop_assert_eq!(
            PasswordPolicy::new(8, 128).check(&password),
            Err(PolicyViolation::IllegalCharacter)
        );
    }

    /// Generated secrets have the requested length and only charset characters
    #[test]
    fn fuzz_random_secret_charset(len in 0usize..256) {
        let secret = random_secret(len).unwrap();
        prop_assert_eq!(secret.len(), len);
        prop_assert!(secret.bytes().all(|b| SECRET_CHARSET.contains(&b)));
    }

    /// Arbitrary input never panics the header parser
    #[test]
    fn fuzz_decode_header_never_panics(token in "\\PC{0,300}") {
        let _ = decode_header_algorithm(&token);
    }

    /// Arbitrary input never verifies as a token
    #[test]
    fn fuzz_verify_rejects_garbage(token in "[A-Za-z0-9_.-]{0,300}") {
        let codec = codec();
        prop_assert!(codec.verify(&token).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(4))]

    /// A hash verifies its own secret and nothing else
    #[test]
    fn fuzz_hash_verify(secret in "[ -~]{1,64}", other in "[ -~]{1,64}") {
        let stored = hash_secret(&secret).unwrap();
        prop_assert!(verify_secret(&secret, &stored).is_ok());
        if other != secret {
            prop_assert!(verify_secret(&other, &stored).is_err());
        }
    }

    /// Corrupted stored hashes are reported, never panic
    #[test]
    fn fuzz_verify_corrupt_hash(stored in "\\PC{0,120}") {
        let _ = verify_secret("password", &stored);
    }
}
