//! Install/uninstall the `downloadmanager://` URL-scheme handler.
//!
//! Linux only: writes an XDG desktop entry and registers it as the default
//! handler via `xdg-mime`. Browsers then hand captured URLs to
//! `dlm run downloadmanager://<encoded-url>`.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

const DESKTOP_FILE: &str = "dlm-url-handler.desktop";
const SCHEME_MIME: &str = "x-scheme-handler/downloadmanager";

pub fn register() -> Result<()> {
    let path = desktop_entry_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let exe = std::env::current_exe().context("resolve dlm executable path")?;
    let entry = format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=dlm download manager\n\
         NoDisplay=true\n\
         Exec={} run %u\n\
         MimeType={};\n",
        exe.display(),
        SCHEME_MIME
    );
    std::fs::write(&path, entry)
        .with_context(|| format!("write desktop entry {}", path.display()))?;

    let status = std::process::Command::new("xdg-mime")
        .args(["default", DESKTOP_FILE, SCHEME_MIME])
        .status()
        .context("run xdg-mime (is xdg-utils installed?)")?;
    if !status.success() {
        bail!("xdg-mime exited with {}", status);
    }

    println!("Protocol handler registered");
    Ok(())
}

pub fn unregister() -> Result<()> {
    let path = desktop_entry_path()?;
    match std::fs::remove_file(&path) {
        Ok(()) => {
            println!("Protocol handler unregistered");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("Protocol handler was not registered");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

fn desktop_entry_path() -> Result<PathBuf> {
    if !cfg!(unix) {
        bail!("protocol registration is only supported on Linux");
    }
    let xdg_dirs = xdg::BaseDirectories::new()?;
    Ok(xdg_dirs
        .get_data_home()
        .join("applications")
        .join(DESKTOP_FILE))
}
