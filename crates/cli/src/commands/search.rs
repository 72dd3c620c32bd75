// `snapfeed search` — search post captions and tags.

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use snapfeed_client::search::SearchEvent;
use snapfeed_client::ClientError;
use snapfeed_common::types::Post;

use super::SessionArgs;
use crate::output;

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Search term.
    pub term: String,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub term: String,
    pub posts: Vec<Post>,
}

pub fn run(args: SearchArgs) -> anyhow::Result<()> {
    let format = args.session.format();
    let result = super::block_on(format, call_search(&args))?;
    output::print_output(format, &result, format_human)?;
    Ok(())
}

async fn call_search(args: &SearchArgs) -> anyhow::Result<SearchResult> {
    let term = args.term.trim().to_string();
    anyhow::ensure!(!term.is_empty(), "search term must not be empty");

    let session = super::open_session(&args.session).await?;
    let mut events = session.subscribe_search();
    session.use_search(&term);

    loop {
        match events.recv().await.context("search stream closed")? {
            SearchEvent::Results { posts, .. } => return Ok(SearchResult { term, posts }),
            SearchEvent::Failed { error, .. } => return Err(ClientError::Service(error).into()),
            SearchEvent::Cleared { .. } => {}
        }
    }
}

fn format_human(result: &SearchResult) -> String {
    if result.posts.is_empty() {
        return format!("No results for \"{}\".", result.term);
    }

    let mut lines = Vec::new();
    lines.push(format!("{} result(s) for \"{}\":", result.posts.len(), result.term));
    lines.extend(result.posts.iter().map(super::feed::post_line));
    lines.join("\n")
}
