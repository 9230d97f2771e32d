use crate::config_store::ConfigStore;
use crate::notifier::Notifier;
use crate::paths::Paths;
use async_channel::Receiver;
use botagent_core::{BuildIdentity, MessageKind};
use httpmock::prelude::*;
use semver::Version;
use std::path::Path;

/// A store whose identity file points at `server`, already reloaded with
/// `server_json` as the server settings.
pub fn reloaded_store(
    profile: &Path,
    server: &MockServer,
    server_json: &str,
) -> (ConfigStore, Receiver<MessageKind>) {
    std::fs::create_dir_all(profile).unwrap();
    std::fs::write(
        profile.join("settings.json"),
        format!(
            r#"{{ "OrchestratorUrl": "{}", "BotId": "bot-7", "BotToken": "dG9rZW4=" }}"#,
            server.base_url()
        ),
    )
    .unwrap();
    server.mock(|when, then| {
        when.method(GET).path("/public/config/bot.json");
        then.status(200).body(server_json);
    });

    let (notifier, messages) = Notifier::new();
    let store = ConfigStore::new(
        Paths::new(profile),
        crate::http::client().unwrap(),
        BuildIdentity::new(String::new(), &Version::new(1, 0, 0)),
        notifier,
    );
    assert!(store.reload(false));
    (store, messages)
}
