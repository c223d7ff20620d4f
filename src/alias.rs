//! 应用别名解析：把用户输入的简称映射到事件中 `AppName` 的规范名。

use std::collections::HashMap;

/// 内置别名表。规范名本身也需要能解析到自己。
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("pims", "pims-services"),
    ("pims-service", "pims-services"),
    ("pims_services", "pims-services"),
    ("pimsservices", "pims-services"),
];

/// 只读别名表，启动时构建一次，之后通过 `Arc` 共享。
#[derive(Debug, Clone)]
pub struct AliasResolver {
    table: HashMap<String, String>,
}

impl Default for AliasResolver {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AliasResolver {
    pub fn builtin() -> Self {
        Self::with_overrides(std::iter::empty::<(String, String)>())
    }

    /// 内置表加上配置中的别名；配置项会覆盖同名的内置项。
    pub fn with_overrides<I, K, V>(extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = HashMap::new();
        let pairs = BUILTIN_ALIASES
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .chain(
                extra
                    .into_iter()
                    .map(|(a, c)| (a.as_ref().trim().to_string(), c.as_ref().trim().to_string())),
            );
        for (alias, canonical) in pairs {
            if alias.is_empty() || canonical.is_empty() {
                continue;
            }
            table
                .entry(canonical.to_lowercase())
                .or_insert_with(|| canonical.clone());
            table.insert(alias.to_lowercase(), canonical);
        }
        Self { table }
    }

    /// 大小写不敏感的精确匹配，找不到时原样返回。
    pub fn resolve(&self, app: &str) -> String {
        self.table
            .get(&app.to_lowercase())
            .cloned()
            .unwrap_or_else(|| app.to_string())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// 按别名排序的 (别名, 规范名) 列表。
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .table
            .iter()
            .map(|(a, c)| (a.as_str(), c.as_str()))
            .collect();
        out.sort_unstable();
        out
    }
}
