//! Server-side request handling.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, Instrument};

use super::commands::CommandContext;
use super::ServerState;
use crate::auth::{AuthError, AuthRequest, Invoker};
use crate::channel::{
    Call, Channel, ChannelError, CommandInvocation, CommandOutcome, RemoteFailure, Reply,
    RequestHandler,
};
use crate::telemetry::{CommandSpan, SpanExt};

/// Calls back into the client over the command's channel.
pub struct RemoteInvoker {
    channel: Channel,
}

impl RemoteInvoker {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    async fn text(&self, call: Call) -> Result<Option<String>, ChannelError> {
        let kind = call.kind();
        match self.channel.invoke(call).await? {
            Reply::Text { value } => Ok(value),
            other => Err(ChannelError::unexpected(kind, &other)),
        }
    }

    /// Store a session token in the client's credential store.
    pub async fn store_token(&self, url: &str, token: &str) -> Result<(), ChannelError> {
        let call = Call::StoreToken {
            url: url.to_string(),
            token: token.to_string(),
        };
        match self.channel.invoke(call).await? {
            Reply::Done => Ok(()),
            other => Err(ChannelError::unexpected("store_token", &other)),
        }
    }

    /// Remove the client's entry for `url`. Returns whether one existed.
    pub async fn remove_token(&self, url: &str) -> Result<bool, ChannelError> {
        let call = Call::RemoveToken {
            url: url.to_string(),
        };
        match self.channel.invoke(call).await? {
            Reply::Flag { value } => Ok(value),
            other => Err(ChannelError::unexpected("remove_token", &other)),
        }
    }
}

#[async_trait]
impl Invoker for RemoteInvoker {
    async fn read_password_file(&self, path: &str) -> Result<String, AuthError> {
        self.text(Call::ReadPasswordFile {
            path: path.to_string(),
        })
        .await?
        .ok_or_else(|| AuthError::Authentication(format!("password file {} is unavailable", path)))
    }

    async fn prompt_password(&self, prompt: &str) -> Result<Option<String>, AuthError> {
        Ok(self
            .text(Call::PromptPassword {
                prompt: prompt.to_string(),
            })
            .await?)
    }

    async fn stored_token(&self, url: &str) -> Result<Option<String>, AuthError> {
        Ok(self
            .text(Call::ReadStoredToken {
                url: url.to_string(),
            })
            .await?)
    }

    async fn build_scope_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.text(Call::ReadBuildToken).await?)
    }
}

/// Answers `Execute` and `HasCommand` from clients.
pub struct CommandDispatcher {
    state: Arc<ServerState>,
}

impl CommandDispatcher {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    async fn execute(&self, invocation: CommandInvocation, channel: Channel) -> CommandOutcome {
        let name = invocation.command_name().to_string();
        let span = CommandSpan::new(&name, channel.id());
        let state = &self.state;

        async {
            let Some(command) = state.commands.get(&name) else {
                debug!("unknown command");
                return CommandOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!(
                        "No such command: {}\nRun 'help' to list the available commands.\n",
                        name
                    ),
                };
            };

            let invoker = RemoteInvoker::new(channel);
            let request = AuthRequest {
                credentials: invocation.credentials,
                root_url: state.root_url.clone(),
            };
            let resolved = state.resolver.resolve(&request, &invoker).await;
            span.record_result(&resolved);
            let principal = match resolved {
                Ok(principal) => principal,
                Err(e) => {
                    return CommandOutcome {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: format!("authentication failed: {}\n", e),
                    }
                }
            };
            span.record("principal", principal.name());

            let args = invocation.args.get(1..).unwrap_or(&[]);
            let mut ctx = CommandContext::new(args, &principal, &invoker, state);
            let exit_code = command.run(&mut ctx).await;
            span.record("exit_code", exit_code);
            debug!(exit_code, "command finished");
            ctx.into_outcome(exit_code)
        }
        .instrument(span.clone())
        .await
    }
}

#[async_trait]
impl RequestHandler for CommandDispatcher {
    async fn handle(&self, call: Call, channel: Channel) -> Result<Reply, RemoteFailure> {
        match call {
            Call::Execute(invocation) => Ok(Reply::Outcome(self.execute(invocation, channel).await)),
            Call::HasCommand { name } => Ok(Reply::Flag {
                value: self.state.commands.contains(&name),
            }),
            other => Err(RemoteFailure::new(format!(
                "{} is not served by the server",
                other.kind()
            ))),
        }
    }
}
