// `snapfeed like` — toggle the signed-in user's like on a post.

use clap::Args;
use snapfeed_client::session::LikeToggle;
use snapfeed_common::types::PostId;

use super::SessionArgs;
use crate::output;

#[derive(Debug, Args)]
pub struct LikeArgs {
    /// Id of the post to like or unlike.
    pub post_id: String,

    #[command(flatten)]
    session: SessionArgs,
}

pub fn run(args: LikeArgs) -> anyhow::Result<()> {
    let format = args.session.format();
    let toggle = super::block_on(format, toggle_like(&args))?;
    output::print_output(format, &toggle, format_human)?;
    Ok(())
}

async fn toggle_like(args: &LikeArgs) -> anyhow::Result<LikeToggle> {
    let session = super::open_session(&args.session).await?;
    let post_id = PostId::new(args.post_id.trim());
    session.post(&post_id).await?;
    session.toggle_like(&post_id)?.settled().await?;
    Ok(session.use_like_toggle(&post_id)?)
}

fn format_human(toggle: &LikeToggle) -> String {
    let verb = if toggle.liked { "Liked" } else { "Unliked" };
    format!("{verb} {} ({} like(s))", toggle.post_id, toggle.like_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_like_marks_post_liked() {
        let args = LikeArgs { post_id: "post-05".into(), session: SessionArgs { demo: true, json: true } };
        let toggle = toggle_like(&args).await.expect("like");
        assert!(toggle.liked);
        assert_eq!(toggle.like_count, 1);
        assert!(!toggle.is_pending);
        assert_eq!(format_human(&toggle), "Liked post-05 (1 like(s))");
    }

    #[tokio::test]
    async fn unknown_post_is_not_found() {
        let args = LikeArgs { post_id: "post-99".into(), session: SessionArgs { demo: true, json: true } };
        let error = toggle_like(&args).await.expect_err("missing post");
        assert_eq!(crate::exit_code::ExitCode::from_error(&error), crate::exit_code::ExitCode::NotFound);
    }
}
