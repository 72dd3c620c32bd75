// `snapfeed users` — list user profiles.

use clap::Args;
use serde::Serialize;
use snapfeed_common::types::User;

use super::SessionArgs;
use crate::output;

#[derive(Debug, Args)]
pub struct UsersArgs {
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsersResult {
    pub users: Vec<User>,
}

pub fn run(args: UsersArgs) -> anyhow::Result<()> {
    let format = args.session.format();
    let result = super::block_on(format, async {
        let session = super::open_session(&args.session).await?;
        Ok(UsersResult { users: session.users().await? })
    })?;
    output::print_output(format, &result, format_human)?;
    Ok(())
}

fn format_human(result: &UsersResult) -> String {
    if result.users.is_empty() {
        return "No users.".into();
    }

    let mut lines = Vec::new();
    lines.push(format!("{} user(s)", result.users.len()));
    for user in &result.users {
        lines.push(format!("  {}  {} (@{})", user.id, user.name, user.username));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapfeed_client::rcs::memory::demo_users;

    #[test]
    fn human_format_lists_users() {
        let output = format_human(&UsersResult { users: demo_users() });
        assert!(output.starts_with("3 user(s)"));
        assert!(output.contains("u-chloe  Chloe Park (@chloe)"));
    }
}
