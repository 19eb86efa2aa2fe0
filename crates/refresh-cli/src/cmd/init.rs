use anyhow::Context;
use refresh_core::config::{Config, WarnLevel};
use refresh_core::{io, paths};
use std::path::Path;

const RECIPIENTS_TEMPLATE: &str = "\
# age recipients used to seal profile passwords, one public key per line.
# Generate a key pair with `age-keygen -o key.txt` and paste the public key here.
";

pub fn run(root: &Path, recipient: Option<&str>) -> anyhow::Result<()> {
    println!("Initializing refresh in: {}", root.display());

    let dir = paths::refresh_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let recipients = paths::recipients_path(root);
    if io::write_if_missing(&recipients, RECIPIENTS_TEMPLATE.as_bytes())? {
        println!("  created: {}", paths::RECIPIENTS_FILE);
    } else {
        println!("  exists:  {}", paths::RECIPIENTS_FILE);
    }

    if let Some(key) = recipient.map(str::trim).filter(|k| !k.is_empty()) {
        let current = std::fs::read_to_string(&recipients)?;
        if current.lines().any(|l| l.trim() == key) {
            println!("  recipient already present");
        } else {
            let mut updated = current;
            if !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(key);
            updated.push('\n');
            io::atomic_write(&recipients, updated.as_bytes())?;
            println!("  added recipient to {}", paths::RECIPIENTS_FILE);
        }
    }

    let config = Config::load(root)?;
    for w in config.validate() {
        let tag = match w.level {
            WarnLevel::Error => "error",
            WarnLevel::Warning => "warning",
        };
        println!("  {tag}: {}", w.message);
    }

    println!("\nNext: add profiles with `refresh profile add <username>`, then `refresh serve`.");
    Ok(())
}
