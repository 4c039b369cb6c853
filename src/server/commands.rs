//! Built-in commands.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;

use super::dispatch::RemoteInvoker;
use super::ServerState;
use crate::auth::Principal;
use crate::channel::{CommandInfo, CommandOutcome};
use crate::security_log;
use crate::telemetry::SecurityEvent;

/// Everything a command can see while it runs.
pub struct CommandContext<'a> {
    /// Arguments after the command name.
    pub args: &'a [String],
    pub principal: &'a Principal,
    pub client: &'a RemoteInvoker,
    pub state: &'a ServerState,
    pub stdout: String,
    pub stderr: String,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        args: &'a [String],
        principal: &'a Principal,
        client: &'a RemoteInvoker,
        state: &'a ServerState,
    ) -> Self {
        Self {
            args,
            principal,
            client,
            state,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn into_outcome(self, exit_code: i32) -> CommandOutcome {
        CommandOutcome {
            exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// A command runnable through the channel.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Run and return the exit code.
    async fn run(&self, ctx: &mut CommandContext<'_>) -> i32;
}

/// Commands by name.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `help`, `who-am-i`, `version`, `login`, `logout`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Help));
        registry.register(Arc::new(WhoAmI));
        registry.register(Arc::new(Version));
        registry.register(Arc::new(Login));
        registry.register(Arc::new(Logout));
        registry
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn infos(&self) -> Vec<CommandInfo> {
        self.commands
            .values()
            .map(|c| CommandInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
            })
            .collect()
    }
}

struct Help;

#[async_trait]
impl Command for Help {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "Lists all the available commands."
    }

    async fn run(&self, ctx: &mut CommandContext<'_>) -> i32 {
        if let Some(name) = ctx.args.first() {
            return match ctx.state.commands.get(name) {
                Some(command) => {
                    let _ = writeln!(ctx.stdout, "{}\n    {}", command.name(), command.description());
                    0
                }
                None => {
                    let _ = writeln!(ctx.stderr, "No such command: {}", name);
                    -1
                }
            };
        }

        let infos = ctx.state.commands.infos();
        let width = infos.iter().map(|i| i.name.len()).max().unwrap_or(0);
        for info in infos {
            let _ = writeln!(ctx.stdout, "  {:<width$}  {}", info.name, info.description, width = width);
        }
        0
    }
}

struct WhoAmI;

#[async_trait]
impl Command for WhoAmI {
    fn name(&self) -> &'static str {
        "who-am-i"
    }

    fn description(&self) -> &'static str {
        "Reports your credential and permissions."
    }

    async fn run(&self, ctx: &mut CommandContext<'_>) -> i32 {
        let _ = writeln!(ctx.stdout, "Authenticated as: {}", ctx.principal);
        0
    }
}

struct Version;

#[async_trait]
impl Command for Version {
    fn name(&self) -> &'static str {
        "version"
    }

    fn description(&self) -> &'static str {
        "Outputs the current version."
    }

    async fn run(&self, ctx: &mut CommandContext<'_>) -> i32 {
        let _ = writeln!(ctx.stdout, "{}", ctx.state.server_version);
        0
    }
}

struct Login;

#[async_trait]
impl Command for Login {
    fn name(&self) -> &'static str {
        "login"
    }

    fn description(&self) -> &'static str {
        "Saves the current credential to allow future commands to run without explicit credential information."
    }

    async fn run(&self, ctx: &mut CommandContext<'_>) -> i32 {
        let Some(user) = ctx.principal.user_name() else {
            let _ = writeln!(ctx.stderr, "No credentials specified. Use -u and -p to log in.");
            return -1;
        };

        let token = match ctx.state.sessions.issue(user) {
            Ok(token) => token,
            Err(e) => {
                let _ = writeln!(ctx.stderr, "Could not issue a session token: {}", e);
                return -1;
            }
        };

        match ctx.client.store_token(&ctx.state.root_url, &token).await {
            Ok(()) => {
                security_log!(SecurityEvent::TokenIssued, "session token stored on client", "user" => user);
                let _ = writeln!(ctx.stdout, "Logged in as {}", user);
                0
            }
            Err(e) => {
                let _ = writeln!(ctx.stderr, "Could not store the session token: {}", e);
                -1
            }
        }
    }
}

struct Logout;

#[async_trait]
impl Command for Logout {
    fn name(&self) -> &'static str {
        "logout"
    }

    fn description(&self) -> &'static str {
        "Deletes the credential stored with the login command."
    }

    async fn run(&self, ctx: &mut CommandContext<'_>) -> i32 {
        if !ctx.principal.is_authenticated() {
            let _ = writeln!(ctx.stderr, "Must provide credentials");
            return -1;
        }

        match ctx.client.remove_token(&ctx.state.root_url).await {
            Ok(existed) => {
                security_log!(SecurityEvent::Logout, "session token removed from client", "principal" => ctx.principal.name());
                if !existed {
                    let _ = writeln!(ctx.stderr, "No stored credential for {}", ctx.state.root_url);
                }
                0
            }
            Err(e) => {
                let _ = writeln!(ctx.stderr, "Could not remove the stored credential: {}", e);
                -1
            }
        }
    }
}
