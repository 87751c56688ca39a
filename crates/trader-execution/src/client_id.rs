//! client order id 생성.
//!
//! 형식: `<prefix>-<order id>[-<suffix>]-<millis mod 1e9>`, 최대 36자.

use chrono::{DateTime, Utc};

/// 거래소가 허용하는 client order id 최대 길이.
pub const MAX_CLIENT_ID_LEN: usize = 36;

const TIMESTAMP_MODULUS: i64 = 1_000_000_000;

/// client order id 생성기.
#[derive(Debug, Clone)]
pub struct ClientIdGenerator {
    prefix: String,
}

impl Default for ClientIdGenerator {
    fn default() -> Self {
        Self::new("sch")
    }
}

impl ClientIdGenerator {
    /// 허용되지 않는 문자는 제거하고 접두사는 8자로 자릅니다.
    pub fn new(prefix: &str) -> Self {
        let prefix: String = prefix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(8)
            .collect();
        Self {
            prefix: if prefix.is_empty() {
                "sch".to_string()
            } else {
                prefix
            },
        }
    }

    pub fn generate(&self, order_id: i64, suffix: Option<&str>) -> String {
        self.generate_at(order_id, suffix, Utc::now())
    }

    pub fn generate_at(&self, order_id: i64, suffix: Option<&str>, now: DateTime<Utc>) -> String {
        let ts = now.timestamp_millis().rem_euclid(TIMESTAMP_MODULUS);
        let mut head = match suffix {
            Some(suffix) if !suffix.is_empty() => format!("{}-{}-{}", self.prefix, order_id, suffix),
            _ => format!("{}-{}", self.prefix, order_id),
        };
        let tail = format!("-{ts}");
        // 타임스탬프는 유지하고 앞부분을 자릅니다 (ASCII만 남아 있음)
        let budget = MAX_CLIENT_ID_LEN.saturating_sub(tail.len());
        head.truncate(budget);
        head + &tail
    }

    /// 브라켓 그룹 id.
    pub fn group_id(&self, entry_order_id: i64) -> String {
        format!("{}-grp-{}", self.prefix, entry_order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format() {
        let gen = ClientIdGenerator::new("sch");
        let now = Utc.timestamp_millis_opt(1_700_000_123_456).unwrap();
        assert_eq!(gen.generate_at(42, None, now), "sch-42-123456");
        assert_eq!(gen.generate_at(42, Some("tp"), now), "sch-42-tp-123456");
    }

    #[test]
    fn test_length_bounded() {
        let gen = ClientIdGenerator::new("verylongprefix!!");
        let now = Utc.timestamp_millis_opt(1_799_999_999_999).unwrap();
        let id = gen.generate_at(i64::MAX, Some("tp-r3"), now);
        assert!(id.len() <= MAX_CLIENT_ID_LEN, "{id}");
        assert!(id.starts_with("verylong-"));
        assert!(id.ends_with("-999999999"));
    }

    #[test]
    fn test_prefix_sanitized() {
        let gen = ClientIdGenerator::new("a b/c");
        let now = Utc.timestamp_millis_opt(5).unwrap();
        assert_eq!(gen.generate_at(1, None, now), "abc-1-5");
        assert_eq!(ClientIdGenerator::new("--").group_id(7), "sch-grp-7");
    }
}
