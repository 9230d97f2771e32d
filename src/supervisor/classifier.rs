use botagent_core::ConnectionStatus;

/// Agent output patterns, checked top to bottom. The first outcome with a
/// matching substring wins. Matching is case-sensitive.
pub const OUTPUT_RULES: &[(ConnectionStatus, &[&str])] = &[
    (ConnectionStatus::Connected, &["INFO: Connected"]),
    (ConnectionStatus::Interrupted, &["Write side closed"]),
    (ConnectionStatus::Retry, &["Failed to obtain", "is not ready"]),
    (
        ConnectionStatus::Disconnected,
        &[
            "buffer too short",
            "For input string",
            "Invalid byte",
            "takes an operand",
            "No subject alternative DNS",
            "SEVERE: Handshake error",
        ],
    ),
];

/// Classify one line of agent output. Unmatched lines are `Unknown`.
pub fn classify(line: &str) -> ConnectionStatus {
    OUTPUT_RULES
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| line.contains(p)))
        .map(|(status, _)| *status)
        .unwrap_or(ConnectionStatus::Unknown)
}
