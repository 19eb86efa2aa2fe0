use crate::cmd::open_store;
use crate::output::{fmt_time, print_json, print_table, truncate};
use anyhow::Context;
use clap::Subcommand;
use refresh_core::ports::{LogStore, ProfileStore};
use refresh_core::profile::{ProfilePatch, ProfileView};
use std::io::BufRead;
use std::path::Path;

#[derive(Subcommand)]
pub enum ProfileSubcommand {
    /// Add a profile; the password is sealed with age before it is stored
    Add {
        username: String,
        /// Password (default: read one line from stdin)
        #[arg(long, env = "REFRESH_PROFILE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Create the profile deactivated
        #[arg(long)]
        inactive: bool,
    },
    /// List all profiles
    List,
    /// Show one profile and its recent runs
    Show {
        /// Profile id or username
        profile: String,
    },
    /// Include a profile in scheduled passes
    Activate { profile: String },
    /// Exclude a profile from scheduled passes
    Deactivate { profile: String },
    /// Delete a profile (its update logs are kept)
    Remove { profile: String },
}

pub fn run(root: &Path, subcmd: ProfileSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ProfileSubcommand::Add {
            username,
            password,
            notes,
            inactive,
        } => add(root, &username, password, notes, inactive, json),
        ProfileSubcommand::List => list(root, json),
        ProfileSubcommand::Show { profile } => show(root, &profile, json),
        ProfileSubcommand::Activate { profile } => set_active(root, &profile, true, json),
        ProfileSubcommand::Deactivate { profile } => set_active(root, &profile, false, json),
        ProfileSubcommand::Remove { profile } => remove(root, &profile, json),
    }
}

fn read_password() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn add(
    root: &Path,
    username: &str,
    password: Option<String>,
    notes: Option<String>,
    inactive: bool,
    json: bool,
) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let password = match password {
        Some(p) => p,
        None => read_password()?,
    };
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let mut profile = store
        .create_profile(username, &password, notes)
        .with_context(|| format!("failed to add profile '{username}'"))?;
    if inactive {
        profile = store.update_profile(
            profile.id,
            ProfilePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )?;
    }

    if json {
        return print_json(&ProfileView::from(profile));
    }
    println!("Added profile {} ({})", profile.id, profile.username);
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let profiles: Vec<ProfileView> = store.list()?.into_iter().map(ProfileView::from).collect();

    if json {
        return print_json(&profiles);
    }
    if profiles.is_empty() {
        println!("No profiles.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = profiles
        .iter()
        .map(|p| {
            vec![
                p.id.to_string(),
                p.username.clone(),
                if p.is_active { "yes" } else { "no" }.to_string(),
                p.status.to_string(),
                fmt_time(p.last_run_at),
                fmt_time(p.next_run_at),
            ]
        })
        .collect();
    print_table(&["ID", "USERNAME", "ACTIVE", "STATUS", "LAST RUN", "NEXT RUN"], &rows);
    Ok(())
}

fn show(root: &Path, reference: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let profile = ProfileView::from(store.resolve(reference)?);
    let logs = store.for_profile(profile.id, 5)?;

    if json {
        return print_json(&serde_json::json!({ "profile": profile, "recent_logs": logs }));
    }

    println!("Profile:      {} ({})", profile.username, profile.id);
    println!("Active:       {}", if profile.is_active { "yes" } else { "no" });
    println!("Status:       {}", profile.status);
    println!("Last run:     {}", fmt_time(profile.last_run_at));
    println!("Last success: {}", fmt_time(profile.last_success_at));
    println!("Next run:     {}", fmt_time(profile.next_run_at));
    if let Some(notes) = &profile.notes {
        println!("Notes:        {notes}");
    }
    if !profile.content.is_empty() {
        println!("\nContent:");
        for (field, value) in &profile.content {
            println!("  {field}: {}", truncate(value, 80));
        }
    }
    if !logs.is_empty() {
        println!("\nRecent runs:");
        for log in &logs {
            println!(
                "  {}  {:<8}  {}",
                fmt_time(Some(log.executed_at)),
                log.outcome.as_str(),
                truncate(&log.detail, 80)
            );
        }
    }
    Ok(())
}

fn set_active(root: &Path, reference: &str, active: bool, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let id = store.resolve(reference)?.id;
    let profile = store.update_profile(
        id,
        ProfilePatch {
            is_active: Some(active),
            ..Default::default()
        },
    )?;

    if json {
        return print_json(&ProfileView::from(profile));
    }
    let verb = if active { "Activated" } else { "Deactivated" };
    println!("{verb} profile {} ({})", profile.id, profile.username);
    Ok(())
}

fn remove(root: &Path, reference: &str, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let profile = store.resolve(reference)?;
    store.delete_profile(profile.id)?;

    if json {
        return print_json(&serde_json::json!({ "removed": profile.id }));
    }
    println!("Removed profile {} ({})", profile.id, profile.username);
    Ok(())
}
