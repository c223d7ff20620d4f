//! Seq 过滤表达式的拼装。
//!
//! 只负责字符串组合，语法由 Seq 服务端解析。

/// 单引号字面量转义：把 `'` 加倍。
pub fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// 日志级别文本规范化：首字母大写，其余小写（"error" -> "Error"）。
pub fn title_case(level: &str) -> String {
    let mut chars = level.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// 以 `and` 连接的子句集合。
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    clauses: Vec<String>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Property = 'value'`，value 在这里转义。
    pub fn eq(mut self, property: &str, value: &str) -> Self {
        self.clauses.push(format!("{property} = '{}'", escape(value)));
        self
    }

    /// 值为 None 或空串时跳过。
    pub fn eq_opt(self, property: &str, value: Option<&str>) -> Self {
        match value.filter(|v| !v.is_empty()) {
            Some(v) => self.eq(property, v),
            None => self,
        }
    }

    pub fn gt(mut self, property: &str, value: u64) -> Self {
        self.clauses.push(format!("{property} > {value}"));
        self
    }

    /// 相对时间窗口，从求值时刻往前推 `hours` 小时。
    pub fn within_hours(mut self, hours: u32) -> Self {
        self.clauses.push(format!("@Timestamp > Now() - {hours}h"));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn build(self) -> String {
        self.clauses.join(" and ")
    }
}
