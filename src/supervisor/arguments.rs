use crate::credentials::{TokenCipher, entropy_for};
use crate::paths::Paths;
use botagent_core::{ClientConfig, Config};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Template used when the orchestrator declares no launch arguments.
pub const DEFAULT_ARGUMENTS: &str = "-secret";

/// JVM flag making the runtime trust the Windows certificate store.
const TRUST_STORE_FLAG: &str = "-Djavax.net.ssl.trustStoreType=WINDOWS-ROOT";

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"<(.*?)>").expect("placeholder regex should compile"))
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{0} is not configured")]
    MissingField(&'static str),
    #[error("failed to decrypt bot token: {0}")]
    Decrypt(String),
    #[error("failed to start agent: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Everything needed to start the agent process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Builds the agent command line from the current configuration.
pub trait Launcher: Send + Sync {
    fn launch_spec(&self, config: &Config) -> Result<LaunchSpec, LaunchError>;
}

/// Runs the agent jar on the provisioned runtime.
pub struct JavaLauncher {
    paths: Paths,
    cipher: Box<dyn TokenCipher>,
}

impl JavaLauncher {
    pub fn new(paths: Paths, cipher: Box<dyn TokenCipher>) -> Self {
        Self { paths, cipher }
    }
}

impl Launcher for JavaLauncher {
    fn launch_spec(&self, config: &Config) -> Result<LaunchSpec, LaunchError> {
        let server = &config.server;
        let java_path = server
            .java_path
            .as_deref()
            .ok_or(LaunchError::MissingField("JavaPath"))?;
        let agent_path = server
            .agent_path
            .as_deref()
            .ok_or(LaunchError::MissingField("AgentPath"))?;

        let mut args = vec![
            TRUST_STORE_FLAG.to_string(),
            "-jar".to_string(),
            agent_path.to_string(),
        ];
        args.extend(expand_arguments(
            server.agent_arguments.as_deref(),
            &config.client,
            self.cipher.as_ref(),
        )?);

        Ok(LaunchSpec {
            program: self.paths.java_executable(java_path),
            args,
            working_dir: self.paths.profile_dir().to_path_buf(),
        })
    }
}

/// Placeholders a template may reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Token {
    OrchestratorUrl,
    BotId,
    SettingsUrl,
    BotToken,
}

impl Token {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "OrchestratorUrl" => Some(Token::OrchestratorUrl),
            "BotId" => Some(Token::BotId),
            "SettingsUrl" => Some(Token::SettingsUrl),
            "BotToken" => Some(Token::BotToken),
            _ => None,
        }
    }

    fn value(self, client: &ClientConfig, cipher: &dyn TokenCipher) -> Result<String, LaunchError> {
        match self {
            Token::OrchestratorUrl => Ok(client.orchestrator_url.clone().unwrap_or_default()),
            Token::BotId => Ok(client.bot_id.clone().unwrap_or_default()),
            Token::SettingsUrl => Ok(client.settings_url.clone()),
            Token::BotToken => {
                let token = client
                    .bot_token
                    .as_deref()
                    .ok_or(LaunchError::MissingField("BotToken"))?;
                let bot_id = client
                    .bot_id
                    .as_deref()
                    .ok_or(LaunchError::MissingField("BotId"))?;
                cipher
                    .decrypt(token, &entropy_for(bot_id))
                    .map_err(|e| LaunchError::Decrypt(format!("{:#}", e)))
            }
        }
    }
}

/// Expand `<Name>` placeholders in the launch template into argument words.
///
/// The template is split on whitespace first, so substituted values never
/// split into extra arguments. Unknown placeholders expand to nothing.
pub fn expand_arguments(
    template: Option<&str>,
    client: &ClientConfig,
    cipher: &dyn TokenCipher,
) -> Result<Vec<String>, LaunchError> {
    let template = template.unwrap_or(DEFAULT_ARGUMENTS);

    let mut values: HashMap<String, String> = HashMap::new();
    for caps in placeholder().captures_iter(template) {
        let name = &caps[1];
        if values.contains_key(name) {
            continue;
        }
        let value = match Token::parse(name) {
            Some(token) => token.value(client, cipher)?,
            None => {
                log::warn!("Unknown launch argument placeholder <{}>", name);
                String::new()
            }
        };
        values.insert(name.to_string(), value);
    }

    Ok(template
        .split_whitespace()
        .map(|word| {
            placeholder()
                .replace_all(word, |caps: &Captures| {
                    values.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        })
        .collect())
}
