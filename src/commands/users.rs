use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;

use crate::Context;
use crate::cli::UsersArgs;
use crate::commands;
use crate::progress;
use crate::ui;

pub fn run(ctx: &Context, args: &UsersArgs) -> Result<()> {
    let file = commands::load_catalog(args.file.as_deref(), false)?;
    let reconciler = commands::reconciler(ctx, &file.settings)?;

    let pb = (!args.json && !ctx.quiet).then(|| progress::spinner("Listing users..."));
    let users = reconciler.users();
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let users = users.context("Failed to list users")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    ui::header(&format!("Users ({})", reconciler.tag_strategy()));
    if users.is_empty() {
        ui::dim("No users");
        return Ok(());
    }

    for (name, tags) in users.iter() {
        let admin = if tags.admin {
            " administrator".red().bold().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<24} {}{}",
            name.bold(),
            ui::tag_list(&tags.sorted_custom()).dimmed(),
            admin
        );
    }

    println!();
    println!(
        "  {} users, {} administrators",
        users.len().to_string().bold(),
        users.iter().filter(|(_, t)| t.admin).count()
    );
    Ok(())
}
