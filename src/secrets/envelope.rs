//! Envelope 암호화/복호화
//!
//! 봉투 포맷 (v1):
//! - iv: 12 bytes (ChaCha20-Poly1305, IETF nonce)
//! - ciphertext: AEAD 결과 (= 암호문 + 16 bytes 태그)
//!
//! 전송 인코딩: `base64(iv || ciphertext || tag)` (표준 알파벳, 줄바꿈 없음)
//!
//! AAD: 키 별칭 이름 (별칭 간 교차 복호화 방지)

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::Rng;

use crate::secrets::keys::KeyHandle;

/// IV 길이 (96-bit)
pub const IV_LEN: usize = 12;

/// 인증 태그 길이 (128-bit)
pub const TAG_LEN: usize = 16;

/// Envelope 오류
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// base64 디코딩 실패 또는 IV보다 짧은 데이터
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// 태그 불일치, 잘린 암호문, 잘못된 키
    #[error("authentication failed (tampered data or wrong key)")]
    DecryptFailure,

    #[error("encryption failed: {0}")]
    EncryptFailure(String),
}

/// 암호화된 시크릿 표현
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    iv: [u8; IV_LEN],
    ciphertext_and_tag: Vec<u8>,
}

impl Envelope {
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn ciphertext_and_tag(&self) -> &[u8] {
        &self.ciphertext_and_tag
    }

    /// `iv || ciphertext_and_tag` 바이트
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_LEN + self.ciphertext_and_tag.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext_and_tag);
        out
    }

    /// 저장용 base64 문자열
    pub fn encode(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// base64 문자열 파싱
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let bytes = BASE64
            .decode(text)
            .map_err(|e| EnvelopeError::Malformed(format!("invalid base64: {}", e)))?;

        if bytes.len() < IV_LEN {
            return Err(EnvelopeError::Malformed(format!(
                "decoded length {} is shorter than the {}-byte IV",
                bytes.len(),
                IV_LEN
            )));
        }

        let (iv_bytes, rest) = bytes.split_at(IV_LEN);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);

        Ok(Self {
            iv,
            ciphertext_and_tag: rest.to_vec(),
        })
    }
}

/// 평문을 키로 암호화 (매 호출마다 새 랜덤 IV)
pub fn encrypt(plaintext: &[u8], key: &KeyHandle) -> Result<Envelope, EnvelopeError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill(&mut iv);

    let cipher = ChaCha20Poly1305::new(key.material().into());
    let ciphertext_and_tag = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: key.alias().as_str().as_bytes(),
            },
        )
        .map_err(|e| EnvelopeError::EncryptFailure(e.to_string()))?;

    Ok(Envelope {
        iv,
        ciphertext_and_tag,
    })
}

/// 텍스트를 UTF-8 바이트로 인코딩한 뒤 암호화
pub fn encrypt_str(plaintext: &str, key: &KeyHandle) -> Result<Envelope, EnvelopeError> {
    encrypt(plaintext.as_bytes(), key)
}

/// base64 봉투를 키로 복호화
///
/// 부분 평문은 절대 반환하지 않습니다.
pub fn decrypt(envelope_text: &str, key: &KeyHandle) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = Envelope::parse(envelope_text)?;
    decrypt_envelope(&envelope, key)
}

pub fn decrypt_envelope(envelope: &Envelope, key: &KeyHandle) -> Result<Vec<u8>, EnvelopeError> {
    let cipher = ChaCha20Poly1305::new(key.material().into());
    cipher
        .decrypt(
            Nonce::from_slice(&envelope.iv),
            Payload {
                msg: &envelope.ciphertext_and_tag,
                aad: key.alias().as_str().as_bytes(),
            },
        )
        .map_err(|_| EnvelopeError::DecryptFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::category::KeyAlias;
    use proptest::prelude::*;

    fn test_key(alias: KeyAlias, fill: u8) -> KeyHandle {
        KeyHandle::from_bytes(alias, [fill; 32])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key(KeyAlias::TokensKey, 0x42);

        let envelope = encrypt_str("secret123", &key).unwrap();
        let text = envelope.encode();

        let plaintext = decrypt(&text, &key).unwrap();
        assert_eq!(plaintext, b"secret123");
    }

    #[test]
    fn test_envelope_layout() {
        let key = test_key(KeyAlias::TokensKey, 0x42);

        let empty = encrypt(b"", &key).unwrap();
        let decoded = BASE64.decode(empty.encode()).unwrap();
        assert_eq!(decoded.len(), IV_LEN + TAG_LEN);

        let text = encrypt(b"abcd", &key).unwrap().encode();
        assert!(!text.contains('\n'));
        let decoded = BASE64.decode(&text).unwrap();
        assert_eq!(decoded.len(), IV_LEN + 4 + TAG_LEN);
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = test_key(KeyAlias::TokensKey, 0x42);

        let first = encrypt(b"same input", &key).unwrap();
        let second = encrypt(b"same input", &key).unwrap();
        assert_ne!(first.iv(), second.iv());
        assert_ne!(first.encode(), second.encode());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = test_key(KeyAlias::TokensKey, 0x01);
        let key2 = test_key(KeyAlias::TokensKey, 0x02);

        let text = encrypt(b"secret", &key1).unwrap().encode();
        assert_eq!(decrypt(&text, &key2), Err(EnvelopeError::DecryptFailure));
    }

    #[test]
    fn test_alias_is_bound_to_envelope() {
        // 같은 키 바이트라도 다른 별칭으로는 복호화되지 않아야 함
        let tokens = test_key(KeyAlias::TokensKey, 0x07);
        let credentials = test_key(KeyAlias::CredentialsKey, 0x07);

        let text = encrypt(b"token", &tokens).unwrap().encode();
        assert_eq!(
            decrypt(&text, &credentials),
            Err(EnvelopeError::DecryptFailure)
        );
    }

    #[test]
    fn test_malformed_envelopes() {
        let key = test_key(KeyAlias::TokensKey, 0x42);

        assert!(matches!(
            decrypt("not base64!!", &key),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            decrypt(&BASE64.encode([0u8; IV_LEN - 1]), &key),
            Err(EnvelopeError::Malformed(_))
        ));
        // IV만 있고 태그가 없는 경우는 인증 실패
        assert_eq!(
            decrypt(&BASE64.encode([0u8; IV_LEN]), &key),
            Err(EnvelopeError::DecryptFailure)
        );
    }

    #[test]
    fn test_surrounding_whitespace_is_rejected() {
        let key = test_key(KeyAlias::TokensKey, 0x42);
        let text = encrypt(b"secret", &key).unwrap().encode();

        for padded in [format!("{}\n", text), format!(" {}", text), format!("{}\r\n", text)] {
            assert!(matches!(
                decrypt(&padded, &key),
                Err(EnvelopeError::Malformed(_))
            ));
        }
        assert_eq!(decrypt(&text, &key).unwrap(), b"secret");
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = test_key(KeyAlias::TokensKey, 0x42);

        let mut bytes = encrypt(b"secret", &key).unwrap().to_bytes();
        bytes.pop();
        assert_eq!(
            decrypt(&BASE64.encode(&bytes), &key),
            Err(EnvelopeError::DecryptFailure)
        );
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_utf8(plaintext in any::<String>()) {
            let key = test_key(KeyAlias::CredentialsKey, 0x11);
            let text = encrypt_str(&plaintext, &key).unwrap().encode();
            let decrypted = decrypt(&text, &key).unwrap();
            prop_assert_eq!(String::from_utf8(decrypted).unwrap(), plaintext);
        }

        #[test]
        fn prop_single_bit_flip_is_detected(
            plaintext in "[a-z:@é日本]{0,24}",
            byte_pick in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = test_key(KeyAlias::TokensKey, 0x22);
            let mut bytes = encrypt_str(&plaintext, &key).unwrap().to_bytes();
            let idx = byte_pick.index(bytes.len());
            bytes[idx] ^= 1 << bit;

            let result = decrypt(&BASE64.encode(&bytes), &key);
            prop_assert_eq!(result, Err(EnvelopeError::DecryptFailure));
        }
    }

    #[test]
    fn test_roundtrip_edge_strings() {
        let key = test_key(KeyAlias::TokensKey, 0x42);
        for sample in ["", "한국어 토큰", "a:b:c", "🔐\u{0}tail"] {
            let text = encrypt_str(sample, &key).unwrap().encode();
            assert_eq!(decrypt(&text, &key).unwrap(), sample.as_bytes());
        }
    }
}
