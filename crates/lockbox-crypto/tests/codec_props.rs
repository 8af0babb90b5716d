use std::sync::LazyLock;

use lockbox_crypto::{Codec, KeyPair, PLAINTEXT_BLOCK_SIZE};
use proptest::prelude::*;

static CODEC: LazyLock<Codec> = LazyLock::new(|| {
    Codec::new(KeyPair::from_pem(include_str!("../testdata/client-key.pem")).unwrap())
});

proptest! {
    // RSA is slow in debug builds; keep the case count modest.
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..700)) {
        let ciphertext = CODEC.encrypt(&data).unwrap();
        prop_assert_eq!(
            ciphertext.len(),
            data.len().div_ceil(PLAINTEXT_BLOCK_SIZE) * 256
        );
        prop_assert_eq!(CODEC.decrypt(&ciphertext).unwrap(), data);
    }

    #[test]
    fn prop_streaming_matches_one_shot(
        data in proptest::collection::vec(any::<u8>(), 0..600),
        split in 1usize..300,
    ) {
        let mut enc = CODEC.encryptor();
        let mut ciphertext = Vec::new();
        for piece in data.chunks(split) {
            ciphertext.extend(enc.update(piece).unwrap());
        }
        ciphertext.extend(enc.finish().unwrap());
        prop_assert_eq!(ciphertext.len() as u64, CODEC.ciphertext_len(data.len() as u64));

        let mut dec = CODEC.decryptor();
        let mut recovered = Vec::new();
        for piece in ciphertext.chunks(split) {
            recovered.extend(dec.update(piece).unwrap());
        }
        recovered.extend(dec.finish().unwrap());
        prop_assert_eq!(recovered, data);
    }

    #[test]
    fn prop_misaligned_ciphertext_rejected(len in 1usize..1024) {
        prop_assume!(len % 256 != 0);
        prop_assert!(CODEC.decrypt(&vec![0u8; len]).is_err());
    }
}
