//! # 値オブジェクト
//!
//! 削除ジョブで共通利用する、識別子を持たない不変の値を定義する。
//!
//! | 型 | 内部表現 | 用途 |
//! |----|---------|------|
//! | [`Version`] | `u32` | 楽観的ロック用のバージョン番号 |
//! | [`ChunkSize`] | `NonZeroU32` | 1 回の実行で削除する最大件数 |

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::DomainError;

// =========================================================================
// Version（バージョン番号）
// =========================================================================

/// バージョン番号（値オブジェクト）
///
/// 削除ジョブの楽観的ロックに使用する。
/// 1 から始まり、ジョブを永続化するたびにインクリメントされる。
///
/// # 使用例
///
/// ```rust
/// use cascade_domain::value_objects::Version;
///
/// let v1 = Version::initial();
/// assert_eq!(v1.as_u32(), 1);
/// assert_eq!(v1.next().as_u32(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u32);

impl Version {
    /// 初期バージョン（1）を作成する
    pub fn initial() -> Self {
        Self(1)
    }

    /// 指定した値からバージョンを作成する
    ///
    /// # エラー
    ///
    /// 0 を渡した場合は `DomainError::Validation` を返す。
    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value == 0 {
            return Err(DomainError::Validation(
                "バージョン番号は 1 以上である必要があります".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// 次のバージョンを返す
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// 内部の u32 値を取得する
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// i64 に変換する（DB 互換用）
    pub fn as_i64(&self) -> i64 {
        i64::from(self.0)
    }
}

impl TryFrom<i64> for Version {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let value = u32::try_from(value).map_err(|_| {
            DomainError::Validation(format!("バージョン番号が範囲外です: {value}"))
        })?;
        Self::new(value)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::initial()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =========================================================================
// ChunkSize（チャンクサイズ）
// =========================================================================

/// 1 回の `advance` で削除する最大件数
///
/// ジョブ作成時に決まり、以後変更されない。0 は表現できない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ChunkSize(NonZeroU32);

impl ChunkSize {
    /// チャンクサイズを作成する
    ///
    /// # エラー
    ///
    /// 0 を渡した場合は `DomainError::Validation` を返す。
    pub fn new(value: u32) -> Result<Self, DomainError> {
        NonZeroU32::new(value).map(Self).ok_or_else(|| {
            DomainError::Validation("チャンクサイズは 1 以上である必要があります".to_string())
        })
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// usize に変換する（スライス操作用）
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.0.get()).unwrap_or(usize::MAX)
    }
}

impl TryFrom<u32> for ChunkSize {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChunkSize> for u32 {
    fn from(value: ChunkSize) -> Self {
        value.get()
    }
}

impl std::fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
