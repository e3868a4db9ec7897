use std::io;
use std::path::Path;

use tracing::info;

pub const AUTOSTART_NAME: &str = "ScanAgentSGICH";

/// Registers the installed binary to start with the user session.
/// Called after every successful configuration save, so a moved install
/// or a renamed binary heals itself on the next reconfiguration.
pub fn register(exe: &Path) -> io::Result<()> {
    register_for_platform(exe)?;
    info!("auto-start entry registered for {}", exe.display());
    Ok(())
}

#[cfg(target_os = "windows")]
fn register_for_platform(exe: &Path) -> io::Result<()> {
    use winreg::enums::HKEY_CURRENT_USER;
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (run, _) = hkcu.create_subkey(r"Software\Microsoft\Windows\CurrentVersion\Run")?;
    run.set_value(AUTOSTART_NAME, &format!("\"{}\"", exe.display()))
}

#[cfg(target_os = "linux")]
fn register_for_platform(exe: &Path) -> io::Result<()> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no user config dir"))?;
    write_desktop_entry(&config_dir, exe).map(|_| ())
}

#[cfg(target_os = "macos")]
fn register_for_platform(exe: &Path) -> io::Result<()> {
    let home = home::home_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home dir"))?;
    write_launch_agent(&home, exe).map(|_| ())
}

#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
fn register_for_platform(_exe: &Path) -> io::Result<()> {
    tracing::warn!("no auto-start mechanism for this platform, skipping");
    Ok(())
}

/// XDG autostart entry, `~/.config/autostart/scan_agent.desktop`.
#[allow(dead_code)]
fn write_desktop_entry(config_dir: &Path, exe: &Path) -> io::Result<std::path::PathBuf> {
    let dir = config_dir.join("autostart");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("scan_agent.desktop");
    std::fs::write(&path, desktop_entry(exe))?;
    Ok(path)
}

/// launchd agent, `~/Library/LaunchAgents/com.sgich.scanagent.plist`.
#[allow(dead_code)]
fn write_launch_agent(home: &Path, exe: &Path) -> io::Result<std::path::PathBuf> {
    let dir = home.join("Library/LaunchAgents");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("com.sgich.scanagent.plist");
    std::fs::write(&path, launch_agent_plist(exe))?;
    Ok(path)
}

#[allow(dead_code)]
fn desktop_entry(exe: &Path) -> String {
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name={AUTOSTART_NAME}\n\
         Comment=SGICH IT asset scan agent\n\
         Exec={}\n\
         Hidden=false\n\
         X-GNOME-Autostart-enabled=true\n",
        exe.display()
    )
}

#[allow(dead_code)]
fn launch_agent_plist(exe: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>com.sgich.scanagent</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
        exe.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn desktop_entry_points_at_the_binary_and_is_visible() {
        let entry = desktop_entry(&PathBuf::from("/opt/agent/scan-agent"));
        assert!(entry.contains("Exec=/opt/agent/scan-agent"));
        assert!(entry.contains("Hidden=false"));
        assert!(entry.contains("Name=ScanAgentSGICH"));
    }

    #[test]
    fn launch_agent_runs_at_load() {
        let plist = launch_agent_plist(&PathBuf::from("/Users/a/bin/scan-agent"));
        assert!(plist.contains("<string>com.sgich.scanagent</string>"));
        assert!(plist.contains("<string>/Users/a/bin/scan-agent</string>"));
        assert!(plist.contains("<key>RunAtLoad</key>"));
    }

    #[test]
    fn desktop_entry_lands_under_autostart() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_desktop_entry(dir.path(), &PathBuf::from("/tmp/scan-agent")).unwrap();
        assert_eq!(path, dir.path().join("autostart/scan_agent.desktop"));
        assert!(path.exists());
    }
}
