//! # 階層定義（Hierarchy Descriptor）
//!
//! テーブル間の親子関係（外部キー）を表す静的メタデータ。
//! 「このテーブルを親として参照している子テーブルはどれで、外部キー列は何か」に答える。
//!
//! ## 不変条件
//!
//! - 辺の集合は森（forest）を成す。循環は存在しない
//! - 1 つの子テーブルが持つ親テーブルは高々 1 つ
//! - 1 つの親テーブルは複数の子テーブルを持ちうる
//! - テーブル名・列名は SQL 識別子として安全な文字のみで構成される
//!   （`[a-z_][a-z0-9_]*`、最大 63 文字）
//!
//! 識別子の検証はこの型の生成時に一度だけ行うため、record store は
//! `TableName` / `ColumnName` をそのまま SQL に埋め込んでよい。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// PostgreSQL の識別子長の上限
const MAX_IDENTIFIER_LENGTH: usize = 63;

fn validate_identifier(label: &str, value: &str) -> Result<(), DomainError> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(DomainError::Validation(format!("{label}は必須です")));
    };
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(DomainError::Validation(format!(
            "{label}は {MAX_IDENTIFIER_LENGTH} 文字以内である必要があります: {value}"
        )));
    }
    let head_ok = first.is_ascii_lowercase() || first == '_';
    let tail_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !(head_ok && tail_ok) {
        return Err(DomainError::Validation(format!(
            "{label}に使用できない文字が含まれています: {value}"
        )));
    }
    Ok(())
}

/// SQL 識別子として検証済みの名前を定義する
macro_rules! define_identifier {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident { label: $label:expr }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, derive_more::Display,
        )]
        #[serde(try_from = "String", into = "String")]
        #[display("{_0}")]
        $vis struct $Name(String);

        impl $Name {
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                validate_identifier($label, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $Name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$Name> for String {
            fn from(value: $Name) -> Self {
                value.0
            }
        }
    };
}

define_identifier! {
    /// テーブル名
    pub struct TableName { label: "テーブル名" }
}

define_identifier! {
    /// 外部キー列名
    pub struct ColumnName { label: "列名" }
}

/// 親子関係の 1 辺
///
/// `child_table.foreign_key` が `parent_table.id` を参照していることを表す。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub child_table:  TableName,
    pub parent_table: TableName,
    pub foreign_key:  ColumnName,
}

impl HierarchyEdge {
    pub fn new(
        child_table: &str,
        parent_table: &str,
        foreign_key: &str,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            child_table:  TableName::new(child_table)?,
            parent_table: TableName::new(parent_table)?,
            foreign_key:  ColumnName::new(foreign_key)?,
        })
    }
}

/// 階層定義
///
/// 親テーブルごとに子テーブルへの辺を登録順で保持する。
/// 振る舞いは持たず、検索のみを提供する。
#[derive(Debug, Clone)]
pub struct HierarchyDescriptor {
    edges:    Vec<HierarchyEdge>,
    children: HashMap<TableName, Vec<HierarchyEdge>>,
}

impl HierarchyDescriptor {
    /// 辺の集合から階層定義を構築する
    ///
    /// # エラー
    ///
    /// - 同じ辺の重複、親を 2 つ持つ子テーブル、自己参照、循環がある場合は
    ///   `DomainError::Validation`
    pub fn new(edges: Vec<HierarchyEdge>) -> Result<Self, DomainError> {
        let mut parent_of: HashMap<&TableName, &TableName> = HashMap::new();
        for edge in &edges {
            if edge.child_table == edge.parent_table {
                return Err(DomainError::Validation(format!(
                    "自己参照する辺は定義できません: {}",
                    edge.child_table
                )));
            }
            if let Some(existing) = parent_of.insert(&edge.child_table, &edge.parent_table) {
                return Err(DomainError::Validation(format!(
                    "{} は複数の親テーブルを持てません: {} と {}",
                    edge.child_table, existing, edge.parent_table
                )));
            }
        }

        // 親ポインタを辿って循環を検出する
        for start in parent_of.keys() {
            let mut seen: HashSet<&TableName> = HashSet::new();
            let mut current = *start;
            seen.insert(current);
            while let Some(parent) = parent_of.get(current) {
                if !seen.insert(*parent) {
                    return Err(DomainError::Validation(format!(
                        "階層定義に循環があります: {start}"
                    )));
                }
                current = *parent;
            }
        }

        let mut children: HashMap<TableName, Vec<HierarchyEdge>> = HashMap::new();
        for edge in &edges {
            children.entry(edge.child_table.clone()).or_default();
            children
                .entry(edge.parent_table.clone())
                .or_default()
                .push(edge.clone());
        }

        Ok(Self { edges, children })
    }

    /// JSON 配列（`[{ "child_table", "parent_table", "foreign_key" }]`）から構築する
    pub fn from_json(json: &str) -> Result<Self, DomainError> {
        let edges: Vec<HierarchyEdge> = serde_json::from_str(json)
            .map_err(|e| DomainError::Validation(format!("階層定義の JSON が不正です: {e}")))?;
        Self::new(edges)
    }

    /// 指定テーブルを親とする辺の一覧を返す
    ///
    /// 葉のテーブルでは空スライスを返す。
    ///
    /// # エラー
    ///
    /// 階層定義に存在しないテーブルの場合は `DomainError::UnknownTable`
    pub fn child_edges_of(&self, table: &TableName) -> Result<&[HierarchyEdge], DomainError> {
        self.children
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| DomainError::UnknownTable(table.to_string()))
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.children.contains_key(table)
    }

    pub fn edges(&self) -> &[HierarchyEdge] {
        &self.edges
    }

    /// 組み込みの 11 階層定義
    ///
    /// ```text
    /// organizations → workspaces → teams → projects → milestones → epics
    ///   → stories → tasks → subtasks → checklists → checklist_items
    /// ```
    pub fn workspace_hierarchy() -> Self {
        const CHAIN: [(&str, &str); 11] = [
            ("organizations", "organization_id"),
            ("workspaces", "workspace_id"),
            ("teams", "team_id"),
            ("projects", "project_id"),
            ("milestones", "milestone_id"),
            ("epics", "epic_id"),
            ("stories", "story_id"),
            ("tasks", "task_id"),
            ("subtasks", "subtask_id"),
            ("checklists", "checklist_id"),
            ("checklist_items", "checklist_item_id"),
        ];

        let edges = CHAIN
            .windows(2)
            .map(|pair| {
                let (parent, foreign_key) = pair[0];
                let (child, _) = pair[1];
                HierarchyEdge {
                    child_table:  TableName(child.to_string()),
                    parent_table: TableName(parent.to_string()),
                    foreign_key:  ColumnName(foreign_key.to_string()),
                }
            })
            .collect::<Vec<_>>();

        let mut children: HashMap<TableName, Vec<HierarchyEdge>> = HashMap::new();
        for (table, _) in CHAIN {
            children.insert(TableName(table.to_string()), Vec::new());
        }
        for edge in &edges {
            if let Some(list) = children.get_mut(&edge.parent_table) {
                list.push(edge.clone());
            }
        }

        Self { edges, children }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    // 識別子のテスト

    #[rstest]
    #[case("projects")]
    #[case("checklist_items")]
    #[case("_internal")]
    #[case("t2")]
    fn test_識別子として正しい名前を受け入れる(#[case] name: &str) {
        assert!(TableName::new(name).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("Projects")]
    #[case("2teams")]
    #[case("teams; DROP TABLE users")]
    #[case("teams\"")]
    fn test_識別子として不正な名前を拒否する(#[case] name: &str) {
        assert!(TableName::new(name).is_err());
    }

    #[test]
    fn test_識別子は63文字を超えると拒否する() {
        assert!(ColumnName::new("a".repeat(63)).is_ok());
        assert!(ColumnName::new("a".repeat(64)).is_err());
    }

    // HierarchyDescriptor のテスト

    #[test]
    fn test_child_edges_ofは登録順で子の辺を返す() {
        let descriptor = HierarchyDescriptor::new(vec![
            HierarchyEdge::new("teams", "orgs", "org_id").unwrap(),
            HierarchyEdge::new("budgets", "orgs", "org_id").unwrap(),
            HierarchyEdge::new("projects", "teams", "team_id").unwrap(),
        ])
        .unwrap();

        let edges = descriptor.child_edges_of(&table("orgs")).unwrap();
        let names: Vec<&str> = edges.iter().map(|e| e.child_table.as_str()).collect();
        assert_eq!(names, vec!["teams", "budgets"]);
    }

    #[test]
    fn test_child_edges_ofは葉のテーブルで空を返す() {
        let descriptor =
            HierarchyDescriptor::new(vec![HierarchyEdge::new("teams", "orgs", "org_id").unwrap()])
                .unwrap();

        assert!(descriptor.child_edges_of(&table("teams")).unwrap().is_empty());
    }

    #[test]
    fn test_child_edges_ofは未知のテーブルでunknown_tableを返す() {
        let descriptor =
            HierarchyDescriptor::new(vec![HierarchyEdge::new("teams", "orgs", "org_id").unwrap()])
                .unwrap();

        let result = descriptor.child_edges_of(&table("widgets"));
        assert!(matches!(result, Err(DomainError::UnknownTable(t)) if t == "widgets"));
    }

    #[test]
    fn test_親を2つ持つ子テーブルを拒否する() {
        let result = HierarchyDescriptor::new(vec![
            HierarchyEdge::new("projects", "teams", "team_id").unwrap(),
            HierarchyEdge::new("projects", "orgs", "org_id").unwrap(),
        ]);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_自己参照を拒否する() {
        let result =
            HierarchyDescriptor::new(vec![HierarchyEdge::new("folders", "folders", "parent_id").unwrap()]);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_循環を拒否する() {
        let result = HierarchyDescriptor::new(vec![
            HierarchyEdge::new("a", "b", "b_id").unwrap(),
            HierarchyEdge::new("b", "c", "c_id").unwrap(),
            HierarchyEdge::new("c", "a", "a_id").unwrap(),
        ]);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_from_jsonで階層定義を読み込める() {
        let json = r#"[
            { "child_table": "teams", "parent_table": "orgs", "foreign_key": "org_id" },
            { "child_table": "projects", "parent_table": "teams", "foreign_key": "team_id" }
        ]"#;

        let descriptor = HierarchyDescriptor::from_json(json).unwrap();

        assert_eq!(descriptor.edges().len(), 2);
        assert!(descriptor.contains(&table("projects")));
    }

    #[test]
    fn test_from_jsonは不正な識別子を拒否する() {
        let json = r#"[{ "child_table": "Teams", "parent_table": "orgs", "foreign_key": "org_id" }]"#;
        assert!(HierarchyDescriptor::from_json(json).is_err());
    }

    #[test]
    fn test_組み込み階層は11テーブルの鎖になる() {
        let descriptor = HierarchyDescriptor::workspace_hierarchy();

        assert_eq!(descriptor.edges().len(), 10);

        let mut current = table("organizations");
        let mut depth = 1;
        while let [edge] = descriptor.child_edges_of(&current).unwrap() {
            current = edge.child_table.clone();
            depth += 1;
        }
        assert_eq!(depth, 11);
        assert_eq!(current, table("checklist_items"));
    }

    #[test]
    fn test_組み込み階層は検証を通過する() {
        let rebuilt = HierarchyDescriptor::new(HierarchyDescriptor::workspace_hierarchy().edges().to_vec());
        assert!(rebuilt.is_ok());
    }
}
