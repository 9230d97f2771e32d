/// User-facing failure messages. The UI renders these; the core only emits them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ConnectionFailed,
    VersionIncompatible,
    UnexpectedError,
}

impl MessageKind {
    pub fn text(self) -> &'static str {
        match self {
            MessageKind::ConnectionFailed => {
                "Connection failed. Make sure connected\nto server and bot config is valid!"
            }
            MessageKind::VersionIncompatible => "Application need update to latest version!",
            MessageKind::UnexpectedError => "Unexpected error. Contact admin for help!",
        }
    }
}
