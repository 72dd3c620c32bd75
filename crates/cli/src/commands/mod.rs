// CLI subcommand dispatch.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use snapfeed_client::config::ClientConfig;
use snapfeed_client::rcs::InMemoryContentService;
use snapfeed_client::{ClientError, FeedSession};
use snapfeed_common::ServiceError;
use tracing::debug;

use crate::output::{self, OutputFormat};

pub mod config;
pub mod feed;
pub mod like;
pub mod save;
pub mod search;
pub mod users;
pub mod whoami;

#[derive(Subcommand)]
pub enum Command {
    /// Show the newest posts, page by page
    Feed(feed::FeedArgs),
    /// Search post captions and tags
    Search(search::SearchArgs),
    /// Like or unlike a post
    Like(like::LikeArgs),
    /// Save or unsave a post
    Save(save::SaveArgs),
    /// Show the signed-in user
    Whoami(whoami::WhoamiArgs),
    /// List user profiles
    Users(users::UsersArgs),
    /// Show or initialize the client configuration
    Config(config::ConfigArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Feed(args) => feed::run(args),
        Command::Search(args) => search::run(args),
        Command::Like(args) => like::run(args),
        Command::Save(args) => save::run(args),
        Command::Whoami(args) => whoami::run(args),
        Command::Users(args) => users::run(args),
        Command::Config(args) => config::run(args),
    }
}

/// Flags shared by every command that talks to the content service.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Run against a seeded in-memory service instead of the network.
    #[arg(long)]
    pub demo: bool,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

impl SessionArgs {
    pub fn format(&self) -> OutputFormat {
        OutputFormat::detect(self.json)
    }
}

/// Connect a session. A rejected session token is an error here, unlike in
/// the library, since a command cannot do anything useful without it.
pub async fn open_session(args: &SessionArgs) -> anyhow::Result<FeedSession> {
    let config = ClientConfig::load();
    let session = if args.demo {
        debug!("using in-memory demo service");
        FeedSession::connect(Arc::new(InMemoryContentService::demo()), &config).await?
    } else {
        FeedSession::connect_http(&config)
            .await
            .with_context(|| format!("connecting to {}", config.service.base_url))?
    };

    if let snapfeed_client::auth::AuthState::Expired { reason } = session.auth_state() {
        return Err(ClientError::Service(ServiceError::unauthorized(reason)).into());
    }
    Ok(session)
}

/// Run a command body on a fresh runtime, printing any failure in `format`.
pub fn block_on<T, Fut>(format: OutputFormat, fut: Fut) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
        .and_then(|runtime| runtime.block_on(fut));

    if let Err(error) = &result {
        output::print_anyhow_error(format, error);
    }
    result
}
