//! # Cache Keys
//!
//! 分析请求的缓存键生成，以及数据变更后的失效模式。

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

const ANONYMOUS: &str = "anonymous";

/// 根据请求生成缓存键
///
/// 格式: `analytics:{METHOD}:{path}:{role}:{user}:{query-json}`，
/// 未认证请求的角色和用户记为 `anonymous`。
///
/// ```rust
/// use perfgov_core::cache::request_cache_key;
/// use serde_json::json;
///
/// let params = json!({"term": 2});
/// let route = "/api/analytics/overview";
/// let key = request_cache_key("GET", route, Some("admin"), Some("7"), &params);
/// assert_eq!(key, r#"analytics:GET:/api/analytics/overview:admin:7:{"term":2}"#);
/// ```
pub fn request_cache_key(
    method: &str,
    path: &str,
    role: Option<&str>,
    user_id: Option<&str>,
    query: &Value,
) -> String {
    format!(
        "analytics:{}:{}:{}:{}:{}",
        method.to_ascii_uppercase(),
        path,
        role.unwrap_or(ANONYMOUS),
        user_id.unwrap_or(ANONYMOUS),
        query
    )
}

/// 变更的数据类型，决定需要失效的分析缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Attendance,
    Grades,
    Students,
    All,
}

impl DataKind {
    /// 对应的失效正则
    pub fn pattern(self) -> &'static str {
        match self {
            DataKind::Attendance => "analytics.*attendance",
            DataKind::Grades => "analytics.*grade",
            DataKind::Students => "analytics.*student",
            DataKind::All => "analytics.*",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Attendance => "attendance",
            DataKind::Grades => "grades",
            DataKind::Students => "students",
            DataKind::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for DataKind {
    type Err = std::convert::Infallible;

    /// 未知类型按 `All` 处理
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "attendance" => DataKind::Attendance,
            "grades" => DataKind::Grades,
            "students" => DataKind::Students,
            _ => DataKind::All,
        })
    }
}
