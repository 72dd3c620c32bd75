// `snapfeed feed` — show the newest posts.

use clap::Args;
use serde::Serialize;
use snapfeed_client::pagination::LoadOutcome;
use snapfeed_common::types::Post;

use super::SessionArgs;
use crate::output;

#[derive(Debug, Args)]
pub struct FeedArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Number of pages to load.
    #[arg(long, default_value = "1")]
    pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedResult {
    pub posts: Vec<Post>,
    pub has_more: bool,
}

pub fn run(args: FeedArgs) -> anyhow::Result<()> {
    let format = args.session.format();
    let result = super::block_on(format, load_feed(&args))?;
    output::print_output(format, &result, format_human)?;
    Ok(())
}

async fn load_feed(args: &FeedArgs) -> anyhow::Result<FeedResult> {
    let session = super::open_session(&args.session).await?;
    for _ in 0..args.pages.max(1) {
        if session.load_more().await? == LoadOutcome::Exhausted {
            break;
        }
    }
    let feed = session.use_feed();
    Ok(FeedResult { posts: feed.posts, has_more: feed.has_more })
}

pub(crate) fn post_line(post: &Post) -> String {
    let tags = if post.tags.is_empty() {
        String::new()
    } else {
        let tags: Vec<String> = post.tags.iter().map(|tag| format!("#{tag}")).collect();
        format!("  {}", tags.join(" "))
    };
    format!(
        "  {}  {}  ({} like(s), by {}, {}){}",
        post.id,
        post.caption,
        post.like_count(),
        post.creator_id,
        post.created_at.format("%Y-%m-%d %H:%M"),
        tags
    )
}

fn format_human(result: &FeedResult) -> String {
    if result.posts.is_empty() {
        return "The feed is empty.".into();
    }

    let mut lines = Vec::new();
    lines.push(format!("{} post(s)", result.posts.len()));
    lines.extend(result.posts.iter().map(post_line));
    if result.has_more {
        lines.push("  … more available (use --pages)".into());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapfeed_client::rcs::memory::{demo_posts, demo_users};

    #[test]
    fn human_format_lists_posts() {
        let posts = demo_posts(&demo_users(), 2);
        let output = format_human(&FeedResult { posts, has_more: true });
        assert!(output.starts_with("2 post(s)"));
        assert!(output.contains("post-01"));
        assert!(output.contains("more available"));
    }

    #[test]
    fn human_format_handles_empty_feed() {
        let output = format_human(&FeedResult { posts: Vec::new(), has_more: false });
        assert_eq!(output, "The feed is empty.");
    }

    #[tokio::test]
    async fn demo_feed_loads_requested_pages() {
        let args = FeedArgs { session: SessionArgs { demo: true, json: true }, pages: 2 };
        let result = load_feed(&args).await.expect("demo feed");
        assert_eq!(result.posts.len(), 20);
        assert!(result.has_more);
    }
}
