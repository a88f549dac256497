use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";
/// Largest multiple of 36 that fits in a byte; bytes above it are rejected.
const UNBIASED_LIMIT: u8 = 252;

pub const DEFAULT_KEY_LEN: usize = 12;

static KEY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Random `[a-z0-9]{len}` identifier.
pub fn generate_key(len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        if getrandom::fill(&mut buf).is_err() {
            return fallback_key(len);
        }
        for byte in buf {
            if byte >= UNBIASED_LIMIT {
                continue;
            }
            out.push(ALPHABET[usize::from(byte % 36)] as char);
            if out.len() == len {
                break;
            }
        }
    }
    out
}

pub fn generate_id() -> String {
    generate_key(DEFAULT_KEY_LEN)
}

fn fallback_key(len: usize) -> String {
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    let seq = KEY_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut n = ts_ms ^ (u128::from(seq) << 64);
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        out.push(ALPHABET[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_use_lowercase_alphanumerics() {
        let key = generate_id();
        assert_eq!(key.len(), DEFAULT_KEY_LEN);
        assert!(key.bytes().all(|b| ALPHABET.contains(&b)));
        assert_ne!(generate_id(), generate_id());
        assert_eq!(generate_key(40).len(), 40);
    }

    #[test]
    fn fallback_keys_have_requested_length() {
        let key = fallback_key(12);
        assert_eq!(key.len(), 12);
        assert!(key.bytes().all(|b| ALPHABET.contains(&b)));
    }
}
