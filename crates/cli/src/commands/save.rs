// `snapfeed save` — toggle the signed-in user's save of a post.

use clap::Args;
use snapfeed_client::session::SaveToggle;
use snapfeed_common::types::PostId;

use super::SessionArgs;
use crate::output;

#[derive(Debug, Args)]
pub struct SaveArgs {
    /// Id of the post to save or unsave.
    pub post_id: String,

    #[command(flatten)]
    session: SessionArgs,
}

pub fn run(args: SaveArgs) -> anyhow::Result<()> {
    let format = args.session.format();
    let toggle = super::block_on(format, toggle_save(&args))?;
    output::print_output(format, &toggle, format_human)?;
    Ok(())
}

async fn toggle_save(args: &SaveArgs) -> anyhow::Result<SaveToggle> {
    let session = super::open_session(&args.session).await?;
    let post_id = PostId::new(args.post_id.trim());
    session.post(&post_id).await?;
    session.toggle_save(&post_id)?.settled().await?;
    Ok(session.use_save_toggle(&post_id)?)
}

fn format_human(toggle: &SaveToggle) -> String {
    let verb = if toggle.saved { "Saved" } else { "Removed from saved:" };
    format!("{verb} {}", toggle.post_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_save_marks_post_saved() {
        let args = SaveArgs { post_id: "post-07".into(), session: SessionArgs { demo: true, json: true } };
        let toggle = toggle_save(&args).await.expect("save");
        assert!(toggle.saved);
        assert!(!toggle.is_pending);
        assert_eq!(format_human(&toggle), "Saved post-07");
    }
}
