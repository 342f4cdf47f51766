//! HTTP 请求处理器
//!
//! 合作方与上游平台发来的数字字段经常在字符串和数字之间摇摆，
//! 请求体统一先按字符串接收，再在转换成命令时解析。

pub mod callback;
pub mod external;
pub mod kekebang;
pub mod mf178;
pub mod refund;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{RechargeError, Result};

/// 毫秒时间戳的下限，超过即按毫秒处理
const MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// 字符串或数字统一为字符串，null 视为空串
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// 校验请求时间戳是否落在允许的偏差内，兼容秒和毫秒
pub(crate) fn check_timestamp(raw: &str, window_secs: i64, now: i64) -> Result<()> {
    let ts: i64 = raw
        .trim()
        .parse()
        .map_err(|_| RechargeError::Auth(format!("时间戳格式错误: {raw}")))?;
    let ts = if ts > MILLIS_THRESHOLD { ts / 1000 } else { ts };
    if (now - ts).abs() > window_secs {
        return Err(RechargeError::Auth("请求已过期".to_string()));
    }
    Ok(())
}

/// 把请求体拆成 JSON 对象，签名需要原始字段
pub(crate) fn json_object(body: &Value) -> Result<&serde_json::Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| RechargeError::Validation("请求体必须是 JSON 对象".to_string()))
}

pub(crate) fn parse_id(field: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .map_err(|_| RechargeError::Validation(format!("{field} 必须是整数: {raw}")))
}

/// 中国大陆手机号：11 位数字，以 1 开头
pub(crate) fn check_mobile(mobile: &str) -> Result<()> {
    if mobile.len() == 11 && mobile.starts_with('1') && mobile.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(RechargeError::Validation(format!("手机号格式错误: {mobile}")))
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_timestamp_window() {
        let now = 1_700_000_000;
        assert!(check_timestamp("1700000000", 300, now).is_ok());
        assert!(check_timestamp("1699999700", 300, now).is_ok());
        assert!(check_timestamp("1700000301", 300, now).is_err());
        assert!(check_timestamp("1699999000", 300, now).is_err());
    }

    #[test]
    fn test_check_timestamp_millis_and_garbage() {
        let now = 1_700_000_000;
        assert!(check_timestamp("1700000000123", 300, now).is_ok());
        assert!(matches!(
            check_timestamp("yesterday", 300, now),
            Err(RechargeError::Auth(_))
        ));
    }

    #[test]
    fn test_check_mobile() {
        assert!(check_mobile("13800138000").is_ok());
        assert!(check_mobile("23800138000").is_err());
        assert!(check_mobile("1380013800").is_err());
        assert!(check_mobile("1380013800a").is_err());
    }

    #[test]
    fn test_string_or_number() {
        #[derive(Deserialize)]
        struct Sample {
            #[serde(deserialize_with = "string_or_number")]
            id: String,
        }

        let p: Sample = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(p.id, "42");
        let p: Sample = serde_json::from_str(r#"{"id": "A42"}"#).unwrap();
        assert_eq!(p.id, "A42");
        let p: Sample = serde_json::from_str(r#"{"id": null}"#).unwrap();
        assert_eq!(p.id, "");
    }
}
