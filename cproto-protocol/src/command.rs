//! cproto command codes.

use crate::error::ProtocolError;
use std::fmt;

/// RPC command codes carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CmdCode {
    // Session management
    Ping = 0,
    Login = 1,
    OpenDatabase = 2,
    CloseDatabase = 3,
    DropDatabase = 4,

    // Namespaces and indexes
    OpenNamespace = 16,
    CloseNamespace = 17,
    DropNamespace = 18,
    AddIndex = 21,
    EnumNamespaces = 22,
    DropIndex = 24,
    UpdateIndex = 25,

    // Transactions
    AddTxItem = 26,
    CommitTx = 27,
    RollbackTx = 28,
    StartTransaction = 29,

    // Items and queries
    Commit = 32,
    ModifyItem = 33,
    DeleteQuery = 34,
    UpdateQuery = 35,
    Select = 48,
    SelectSql = 49,
    FetchResults = 50,
    CloseResults = 51,

    // Metadata
    GetMeta = 64,
    PutMeta = 65,
    EnumMeta = 66,

    // Server-pushed updates
    SubscribeUpdates = 90,
    Updates = 91,
}

impl CmdCode {
    const ALL: [CmdCode; 29] = [
        CmdCode::Ping,
        CmdCode::Login,
        CmdCode::OpenDatabase,
        CmdCode::CloseDatabase,
        CmdCode::DropDatabase,
        CmdCode::OpenNamespace,
        CmdCode::CloseNamespace,
        CmdCode::DropNamespace,
        CmdCode::AddIndex,
        CmdCode::EnumNamespaces,
        CmdCode::DropIndex,
        CmdCode::UpdateIndex,
        CmdCode::AddTxItem,
        CmdCode::CommitTx,
        CmdCode::RollbackTx,
        CmdCode::StartTransaction,
        CmdCode::Commit,
        CmdCode::ModifyItem,
        CmdCode::DeleteQuery,
        CmdCode::UpdateQuery,
        CmdCode::Select,
        CmdCode::SelectSql,
        CmdCode::FetchResults,
        CmdCode::CloseResults,
        CmdCode::GetMeta,
        CmdCode::PutMeta,
        CmdCode::EnumMeta,
        CmdCode::SubscribeUpdates,
        CmdCode::Updates,
    ];

    /// Parses a wire command code.
    pub fn from_u16(code: u16) -> Result<Self, ProtocolError> {
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| *cmd as u16 == code)
            .ok_or(ProtocolError::UnknownCommand(code))
    }

    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Looks a command up by name, case-insensitively (`select_sql`, `SelectSql`).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| format!("{:?}", cmd).to_ascii_lowercase() == wanted)
    }
}

impl fmt::Display for CmdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
