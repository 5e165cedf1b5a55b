//! Integration coverage for per-instance encryption-domain isolation (I6,
//! P4): two `TokenManager`-owned `SecretStore`s must never be able to read
//! each other's ciphertext, even when they encrypt the same plaintext.

use dicomweb_oauth_broker::secret_store::SecretStore;

#[test]
fn independent_instances_cannot_cross_decrypt() {
    let store_a = SecretStore::new().expect("store a should initialize");
    let store_b = SecretStore::new().expect("store b should initialize");

    let secret = "eyJhbGciOiJSUzI1NiJ9.example-access-token";
    let ciphertext_a = store_a.encrypt(secret).expect("encrypt under a");

    assert_eq!(store_a.decrypt(&ciphertext_a).expect("decrypt under a"), secret);
    assert!(store_b.decrypt(&ciphertext_a).is_err());
}

#[test]
fn many_sequential_encryptions_all_round_trip() {
    let store = SecretStore::new().expect("store should initialize");
    let mut ciphertexts = Vec::new();
    for i in 0..64 {
        ciphertexts.push((format!("token-{i}"), store.encrypt(&format!("token-{i}")).unwrap()));
    }
    for (plaintext, ciphertext) in &ciphertexts {
        assert_eq!(&store.decrypt(ciphertext).unwrap(), plaintext);
    }
}
