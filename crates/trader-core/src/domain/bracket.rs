//! 브라켓(진입 + TP/SL) 연결 기록.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TraderError;

/// 브라켓 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketStatus {
    /// TP와 SL이 모두 등록됨
    Active,
    /// 한쪽 레그만 등록됨
    Partial,
    /// 한쪽 레그가 체결되어 종료됨
    Closed,
    /// 진입 주문이 체결 전에 취소됨
    Orphaned,
}

impl BracketStatus {
    /// 레그 등록 결과로부터 초기 상태를 결정합니다.
    pub fn from_legs(has_tp: bool, has_sl: bool) -> Self {
        if has_tp && has_sl {
            BracketStatus::Active
        } else {
            BracketStatus::Partial
        }
    }

    /// 아직 보호 주문이 살아있는 상태인지 확인합니다.
    pub fn is_open(&self) -> bool {
        matches!(self, BracketStatus::Active | BracketStatus::Partial)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BracketStatus::Active => "active",
            BracketStatus::Partial => "partial",
            BracketStatus::Closed => "closed",
            BracketStatus::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for BracketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BracketStatus {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "partial" => Ok(Self::Partial),
            "closed" => Ok(Self::Closed),
            "orphaned" => Ok(Self::Orphaned),
            other => Err(TraderError::InvalidInput(format!("unknown bracket status: {other}"))),
        }
    }
}

/// 진입 주문과 보호 주문(TP/SL)의 연결.
///
/// 실제로 제출된 레그의 client id만 기록합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketLink {
    pub group_id: String,
    pub symbol: String,
    pub entry_order_id: i64,
    pub entry_client_id: String,
    pub tp_client_id: Option<String>,
    pub sl_client_id: Option<String>,
    pub status: BracketStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BracketLink {
    /// 새 연결 기록을 생성합니다.
    pub fn new(
        group_id: impl Into<String>,
        symbol: impl Into<String>,
        entry_order_id: i64,
        entry_client_id: impl Into<String>,
        tp_client_id: Option<String>,
        sl_client_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let status = BracketStatus::from_legs(tp_client_id.is_some(), sl_client_id.is_some());
        Self {
            group_id: group_id.into(),
            symbol: symbol.into(),
            entry_order_id,
            entry_client_id: entry_client_id.into(),
            tp_client_id,
            sl_client_id,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// 등록된 레그 client id 목록.
    pub fn leg_client_ids(&self) -> Vec<&str> {
        self.tp_client_id
            .iter()
            .chain(self.sl_client_id.iter())
            .map(String::as_str)
            .collect()
    }

    /// 주어진 레그의 반대편 레그 client id.
    pub fn sibling_of(&self, client_id: &str) -> Option<&str> {
        if self.tp_client_id.as_deref() == Some(client_id) {
            self.sl_client_id.as_deref()
        } else if self.sl_client_id.as_deref() == Some(client_id) {
            self.tp_client_id.as_deref()
        } else {
            None
        }
    }
}
