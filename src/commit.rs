//! # Commit-Reveal
//!
//! 发布 `SHA256("{number}:{salt}")` 作为承诺，游戏结束后公开 number 与 salt，
//! 任何人都可以用同样的拼接方式重新计算并比对。

use rand::Rng;
use sha2::{Digest, Sha256};

/// 盐的字节数 (128 bit)
pub const SALT_BYTES: usize = 16;

/// 一次承诺的公开部分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub salt: String,
    pub hash: String,
}

/// 生成随机盐 (小写十六进制)
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// 按规范拼接计算哈希
pub fn hash_number(number: i64, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", number, salt).as_bytes());
    hex::encode(hasher.finalize())
}

pub fn commit(number: i64) -> Commitment {
    let salt = generate_salt();
    let hash = hash_number(number, &salt);
    Commitment { salt, hash }
}

/// 无副作用，可由任何第三方重复执行
pub fn verify(number: i64, salt: &str, hash: &str) -> bool {
    hash_number(number, salt) == hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salt_is_128_bit_lowercase_hex() {
        let salt = generate_salt();
        assert_eq!(salt.len(), SALT_BYTES * 2);
        assert!(salt.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(salt, generate_salt());
    }

    #[test]
    fn test_canonical_concatenation() {
        let expected = hex::encode(Sha256::digest(b"42:abc"));
        assert_eq!(hash_number(42, "abc"), expected);
        assert_eq!(expected.len(), 64);
        assert_eq!(expected, expected.to_lowercase());
    }

    #[test]
    fn test_commit_then_verify() {
        for number in [1, 2, 77, 5000, 9999, 10000] {
            let c = commit(number);
            assert!(verify(number, &c.salt, &c.hash));
        }
    }

    #[test]
    fn test_verify_rejects_other_numbers() {
        let c = commit(1234);
        for other in (1..=10000).step_by(37).filter(|n| *n != 1234) {
            assert!(!verify(other, &c.salt, &c.hash));
        }
    }

    #[test]
    fn test_verify_rejects_other_salt() {
        let c = commit(10);
        assert!(!verify(10, &generate_salt(), &c.hash));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_number(7, "00ff"), hash_number(7, "00ff"));
        assert_ne!(hash_number(7, "00ff"), hash_number(70, "0ff"));
    }
}
