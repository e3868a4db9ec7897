use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs, io};

use tracing::{info, warn};

pub const INSTALL_DIR_NAME: &str = "ScanAgentSGICH";
const FALLBACK_DIR_NAME: &str = ".scanagentsgich";

/// Stable per-user install location: `%LOCALAPPDATA%` on Windows,
/// `~/Library/Application Support` on macOS, `~/.local/share` on Linux,
/// all via the platform data-local dir; a home dotdir everywhere else.
pub fn install_dir() -> PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        return base.join(INSTALL_DIR_NAME);
    }
    match home::home_dir() {
        Some(path) if !path.as_os_str().is_empty() => path.join(FALLBACK_DIR_NAME),
        _ => PathBuf::from(FALLBACK_DIR_NAME),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Installed {
    /// Already running from the install dir (or install failed; best effort).
    InPlace,
    /// The installed copy was launched; this process should exit 0.
    Relaunched,
}

/// Self-install step of the bootstrap: when launched from an ephemeral
/// location (download dir, USB stick), copy the program directory to the
/// install dir and hand over to the copy with the original CLI arguments.
/// The relaunch is biased towards the configurator on what is usually a
/// first run. Copy errors are logged and the agent keeps running in place.
pub fn ensure_installed(args: &[String]) -> Installed {
    let exe = match env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            warn!("cannot resolve the current executable ({e}), running in place");
            return Installed::InPlace;
        }
    };
    let source_dir = match exe.parent() {
        Some(dir) => dir.to_path_buf(),
        None => return Installed::InPlace,
    };
    let target_dir = install_dir();
    if same_dir(&source_dir, &target_dir) {
        return Installed::InPlace;
    }

    info!(
        "installing from {} to {}",
        source_dir.display(),
        target_dir.display()
    );
    let installed_exe = match install_tree(&source_dir, &exe, &target_dir) {
        Ok(path) => path,
        Err(e) => {
            warn!("self-install failed ({e}), running in place");
            return Installed::InPlace;
        }
    };

    let mut forwarded: Vec<String> = args.iter().skip(1).cloned().collect();
    let has_mode = forwarded
        .iter()
        .any(|a| a == "--config" || a == "--text-mode" || a == "--setup");
    if !has_mode {
        forwarded.push("--config".into());
    }

    match Command::new(&installed_exe).args(&forwarded).spawn() {
        Ok(_) => {
            info!("relaunched installed agent {}", installed_exe.display());
            Installed::Relaunched
        }
        Err(e) => {
            warn!("could not relaunch {} ({e}), running in place", installed_exe.display());
            Installed::InPlace
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Replaces the destination with a fresh copy of the program directory and
/// returns the path of the installed executable.
fn install_tree(source_dir: &Path, exe: &Path, target_dir: &Path) -> io::Result<PathBuf> {
    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    copy_tree(source_dir, target_dir)?;
    let exe_name = exe
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "executable has no file name"))?;
    Ok(target_dir.join(exe_name))
}

fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_dir_is_the_per_user_branded_location() {
        let dir = install_dir();
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name == INSTALL_DIR_NAME || name == FALLBACK_DIR_NAME);
    }

    #[test]
    fn copy_tree_replicates_nested_directories() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("data/sub")).unwrap();
        fs::write(src.path().join("agent.bin"), b"binary").unwrap();
        fs::write(src.path().join("data/sub/leaf.txt"), b"leaf").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("installed");
        copy_tree(src.path(), &target).unwrap();

        assert_eq!(fs::read(target.join("agent.bin")).unwrap(), b"binary");
        assert_eq!(fs::read(target.join("data/sub/leaf.txt")).unwrap(), b"leaf");
    }

    #[test]
    fn install_tree_removes_a_stale_destination_first() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("agent.bin"), b"new").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("installed");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.bin"), b"old").unwrap();

        let exe = src.path().join("agent.bin");
        let installed = install_tree(src.path(), &exe, &target).unwrap();
        assert_eq!(installed, target.join("agent.bin"));
        assert!(!target.join("stale.bin").exists());
    }
}
