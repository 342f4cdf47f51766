//! 签名算法
//!
//! 合作方下单、上游回调与回推通知使用的 MD5 签名。各平台规则不同：
//!
//! | 方案 | 拼接 | 大小写 |
//! |------|------|--------|
//! | 外部 API | 排序 `k=v&...&key=SECRET`，跳过空值与 sign/signature | 大写 |
//! | 客客帮 | 排序 `k=v&...&secret=SECRET`，跳过空值、sign 与嵌套的 data/datas | 小写 |
//! | MF178 | 排序 `k1v1k2v2...SECRET`，无分隔符，跳过 sign 与 datas | 小写 |
//! | 客客帮状态回推 | 排序 `k1v1k2v2...SECRET`，无分隔符，仅跳过 sign，data 参与签名 | 小写 |
//! | 大猿人 | 排序 `k=v&...&apikey=KEY`，仅跳过 sign | 大写 |
//! | 充值平台 | 固定字段顺序 | 大写 |
//! | 秘史 | 固定字段顺序 `szAgentId=..&...&szKey=SECRET` | 小写 |
//! | 闲赚侠 | 排序 `k=v` 无分隔符，跳过空值，追加 `queryTime=..key=KEY`，再以 base64 封装 | 小写 |

use std::collections::BTreeMap;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use md5::{Digest, Md5};
use rust_decimal::Decimal;
use serde_json::Value;

/// 签名参数表，BTreeMap 天然按键升序
pub type SignParams = BTreeMap<String, String>;

/// MD5 小写十六进制
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn join_sorted<'a>(pairs: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    pairs
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// 把 JSON 对象展开为签名参数
///
/// 字符串原样保留，数字与布尔转为字符串，null 视为空值；嵌套的对象和数组不参与签名。
pub fn params_from_json(object: &serde_json::Map<String, Value>) -> SignParams {
    object
        .iter()
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                Value::Object(_) | Value::Array(_) => return None,
            };
            Some((k.clone(), value))
        })
        .collect()
}

// ==================== 外部 API（规范签名） ====================

/// 外部 API 规范签名
pub fn canonical_sign(params: &SignParams, app_secret: &str) -> String {
    let body = join_sorted(
        params
            .iter()
            .filter(|(k, v)| !v.is_empty() && k.as_str() != "sign" && k.as_str() != "signature"),
    );
    md5_hex(&format!("{body}&key={app_secret}")).to_uppercase()
}

pub fn verify_canonical(params: &SignParams, sign: &str, app_secret: &str) -> bool {
    !sign.is_empty() && canonical_sign(params, app_secret).eq_ignore_ascii_case(sign)
}

// ==================== 客客帮 ====================

pub fn kekebang_sign(params: &SignParams, secret: &str) -> String {
    let body = join_sorted(params.iter().filter(|(k, v)| {
        !v.is_empty() && !matches!(k.as_str(), "sign" | "data" | "datas")
    }));
    md5_hex(&format!("{body}&secret={secret}"))
}

pub fn verify_kekebang(params: &SignParams, sign: &str, secret: &str) -> bool {
    !sign.is_empty() && kekebang_sign(params, secret) == sign.to_lowercase()
}

/// 客客帮状态回推签名
///
/// 与下单签名不同：键值直接相连、不跳过空值，data 字符串整体参与签名。
pub fn kekebang_notify_sign(params: &SignParams, secret: &str) -> String {
    let body: String = params
        .iter()
        .filter(|(k, _)| k.as_str() != "sign")
        .map(|(k, v)| format!("{k}{v}"))
        .collect();
    md5_hex(&format!("{body}{secret}"))
}

// ==================== MF178 ====================

/// MF178 下单、查单与状态回推共用的签名
pub fn mf178_sign(params: &SignParams, secret: &str) -> String {
    let body: String = params
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "sign" | "datas"))
        .map(|(k, v)| format!("{k}{v}"))
        .collect();
    md5_hex(&format!("{body}{secret}"))
}

pub fn verify_mf178(params: &SignParams, sign: &str, secret: &str) -> bool {
    !sign.is_empty() && mf178_sign(params, secret) == sign.to_lowercase()
}

// ==================== 大猿人 ====================

pub fn dayuanren_sign(params: &SignParams, api_key: &str) -> String {
    let body = join_sorted(params.iter().filter(|(k, _)| k.as_str() != "sign"));
    md5_hex(&format!("{body}&apikey={api_key}")).to_uppercase()
}

pub fn verify_dayuanren(params: &SignParams, sign: &str, api_key: &str) -> bool {
    !sign.is_empty() && dayuanren_sign(params, api_key) == sign
}

// ==================== 充值平台 ====================

/// 充值平台下单参数
#[derive(Debug, Clone)]
pub struct ChongzhiOrderParams<'a> {
    pub userid: &'a str,
    pub productid: &'a str,
    pub price: &'a str,
    pub num: &'a str,
    pub mobile: &'a str,
    pub spordertime: &'a str,
    pub sporderid: &'a str,
}

pub fn chongzhi_submit_sign(p: &ChongzhiOrderParams<'_>, key: &str) -> String {
    md5_hex(&format!(
        "userid={}&productid={}&price={}&num={}&mobile={}&spordertime={}&sporderid={}&key={}",
        p.userid, p.productid, p.price, p.num, p.mobile, p.spordertime, p.sporderid, key
    ))
    .to_uppercase()
}

/// 回调签名：userid、orderid、sporderid、merchantsubmittime、resultno 固定顺序
pub fn chongzhi_callback_sign(
    userid: &str,
    orderid: &str,
    sporderid: &str,
    merchantsubmittime: &str,
    resultno: &str,
    key: &str,
) -> String {
    md5_hex(&format!(
        "userid={userid}&orderid={orderid}&sporderid={sporderid}&merchantsubmittime={merchantsubmittime}&resultno={resultno}&key={key}"
    ))
    .to_uppercase()
}

pub fn chongzhi_balance_sign(userid: &str, key: &str) -> String {
    md5_hex(&format!("userid={userid}&key={key}")).to_uppercase()
}

// ==================== 秘史 ====================

/// 秘史下单参数，字段按签名顺序排列
#[derive(Debug, Clone)]
pub struct MishiOrderParams<'a> {
    pub agent_id: &'a str,
    pub order_id: &'a str,
    pub phone: &'a str,
    pub money: &'a str,
    pub sort_type: &'a str,
    pub timestamp: &'a str,
}

pub fn mishi_submit_sign(p: &MishiOrderParams<'_>, key: &str) -> String {
    md5_hex(&format!(
        "szAgentId={}&szOrderId={}&szPhoneNum={}&nMoney={}&nSortType={}&nProductClass=1&nProductType=1&szTimeStamp={}&szKey={}",
        p.agent_id, p.order_id, p.phone, p.money, p.sort_type, p.timestamp, key
    ))
}

pub fn mishi_query_sign(agent_id: &str, order_id: &str, key: &str) -> String {
    md5_hex(&format!("szAgentId={agent_id}&szOrderId={order_id}&szKey={key}"))
}

pub fn mishi_balance_sign(agent_id: &str, key: &str) -> String {
    md5_hex(&format!("szAgentId={agent_id}&szKey={key}"))
}

/// 回调签名，`fSalePrice` 保留一位小数
pub fn mishi_callback_sign(params: &SignParams, key: &str) -> String {
    let field = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
    let sale_price = Decimal::from_str(field("fSalePrice"))
        .map(|d| format!("{:.1}", d.round_dp(1)))
        .unwrap_or_else(|_| field("fSalePrice").to_string());
    md5_hex(&format!(
        "szAgentId={}&szOrderId={}&szPhoneNum={}&nDemo={}&fSalePrice={}&nFlag={}&szKey={}",
        field("szAgentId"),
        field("szOrderId"),
        field("szPhoneNum"),
        field("nDemo"),
        sale_price,
        field("nFlag"),
        key
    ))
}

pub fn verify_mishi_callback(params: &SignParams, sign: &str, key: &str) -> bool {
    !sign.is_empty() && mishi_callback_sign(params, key) == sign.to_lowercase()
}

// ==================== 闲赚侠 ====================

/// 带小数点的数字去掉末尾无效的 0，`50.00` 签为 `50`
fn trim_decimal(value: &str) -> String {
    if value.contains('.') {
        if let Ok(d) = Decimal::from_str(value) {
            return d.normalize().to_string();
        }
    }
    value.to_string()
}

fn xianzhuanxia_digest(params: &SignParams, api_key: &str, query_time: &str) -> String {
    let body: String = params
        .iter()
        .filter(|(k, v)| !v.is_empty() && k.as_str() != "sign")
        .map(|(k, v)| format!("{k}={}", trim_decimal(v)))
        .collect();
    md5_hex(&format!("{body}queryTime={query_time}key={api_key}"))
}

/// 闲赚侠 Auth_Token：`base64("{md5},{user_id},{query_time}")`，query_time 为毫秒时间戳
pub fn xianzhuanxia_token(
    params: &SignParams,
    api_key: &str,
    user_id: &str,
    query_time: i64,
) -> String {
    let query_time = query_time.to_string();
    let digest = xianzhuanxia_digest(params, api_key, &query_time);
    BASE64.encode(format!("{digest},{user_id},{query_time}"))
}

/// 校验回调 token
///
/// 用 token 内携带的 query_time 重算摘要，并要求 user_id 与我方账号一致。
pub fn verify_xianzhuanxia_token(
    params: &SignParams,
    token: &str,
    api_key: &str,
    user_id: &str,
) -> bool {
    let Ok(decoded) = BASE64.decode(token.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let mut parts = decoded.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(digest), Some(token_user), Some(query_time)) => {
            token_user == user_id
                && !digest.is_empty()
                && xianzhuanxia_digest(params, api_key, query_time) == digest.to_lowercase()
        }
        _ => false,
    }
}
