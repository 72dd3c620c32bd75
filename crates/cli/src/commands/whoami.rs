// `snapfeed whoami` — show the signed-in user.

use clap::Args;
use snapfeed_common::types::User;

use super::SessionArgs;
use crate::output;

#[derive(Debug, Args)]
pub struct WhoamiArgs {
    #[command(flatten)]
    session: SessionArgs,
}

pub fn run(args: WhoamiArgs) -> anyhow::Result<()> {
    let format = args.session.format();
    let user = super::block_on(format, async {
        let session = super::open_session(&args.session).await?;
        Ok(session.current_user().await?)
    })?;
    output::print_output(format, &user, format_human)?;
    Ok(())
}

fn format_human(user: &User) -> String {
    let mut lines = vec![format!("{} (@{})", user.name, user.username), format!("  id: {}", user.id)];
    if let Some(email) = &user.email {
        lines.push(format!("  email: {email}"));
    }
    if !user.bio.is_empty() {
        lines.push(format!("  bio: {}", user.bio));
    }
    lines.push(format!("  saved: {}, liked: {}", user.saves.len(), user.liked.len()));
    lines.join("\n")
}
