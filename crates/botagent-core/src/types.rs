use serde::{Deserialize, Serialize};

/// Lifecycle status of the supervised agent process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Artifacts are being checked or the process is starting
    Initialize,
    /// Agent reported a successful handshake
    Connected,
    /// No live connection
    #[default]
    Disconnected,
    /// Server was transiently unready, reconnect pending
    Retry,
    /// Agent's write side closed; the agent recovers on its own
    Interrupted,
    /// Output that matched no classification rule
    Unknown,
}

impl ConnectionStatus {
    pub fn display_name(self) -> &'static str {
        match self {
            ConnectionStatus::Initialize => "Initialize, please wait",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Retry => "Retrying",
            ConnectionStatus::Interrupted => "Interrupted",
            ConnectionStatus::Unknown => "Unknown",
        }
    }
}

/// Tray icon shown for a status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotIcon {
    Normal,
    Offline,
}

impl BotIcon {
    pub fn for_status(status: ConnectionStatus) -> Self {
        if status == ConnectionStatus::Connected {
            BotIcon::Normal
        } else {
            BotIcon::Offline
        }
    }
}

/// Payload of the status-changed notification.
///
/// Only constructible through [`StatusChanged::new`], so the icon can never
/// disagree with the status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatusChanged {
    status: ConnectionStatus,
    icon: BotIcon,
}

impl StatusChanged {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            icon: BotIcon::for_status(status),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn icon(&self) -> BotIcon {
        self.icon
    }
}
