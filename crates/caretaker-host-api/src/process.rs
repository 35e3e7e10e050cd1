//! Running process snapshots

use caretaker_api::AppDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A process observed in the OS process table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Process name as the OS reports it
    pub name: String,
    /// Resolved executable, when readable
    pub exe: Option<PathBuf>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            exe: None,
        }
    }

    pub fn with_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.exe = Some(exe.into());
        self
    }

    /// Whether this process is an instance of `app`
    pub fn is_instance_of(&self, app: &AppDescriptor) -> bool {
        if self.exe.as_deref() == Some(app.location.as_path()) {
            return true;
        }
        !app.display_name.is_empty() && self.name == app.display_name
    }

    /// Descriptor for a process that is not a configured app
    pub fn to_descriptor(&self) -> AppDescriptor {
        let location = self.exe.clone().unwrap_or_else(|| PathBuf::from(&self.name));
        let bundle_id = location.to_string_lossy().into_owned();
        AppDescriptor::new(self.name.clone(), location, bundle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_by_exe_or_name() {
        let app = AppDescriptor::new("code", "/usr/share/code/code", "code.desktop");

        let by_exe = ProcessInfo::new(10, "electron").with_exe("/usr/share/code/code");
        assert!(by_exe.is_instance_of(&app));

        let by_name = ProcessInfo::new(11, "code");
        assert!(by_name.is_instance_of(&app));

        let other = ProcessInfo::new(12, "code-helper");
        assert!(!other.is_instance_of(&app));
    }

    #[test]
    fn unknown_process_descriptor() {
        let desc = ProcessInfo::new(7, "htop").with_exe("/usr/bin/htop").to_descriptor();
        assert_eq!(desc.display_name, "htop");
        assert_eq!(desc.bundle_id, "/usr/bin/htop");

        let bare = ProcessInfo::new(8, "kworker").to_descriptor();
        assert_eq!(bare.bundle_id, "kworker");
    }
}
