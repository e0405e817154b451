use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".aurademo"))
            .unwrap_or_else(|| PathBuf::from(".aurademo"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn browser_dir(&self) -> PathBuf {
        self.base.join("browser")
    }

    /// Chrome user data directory for one live session.
    pub fn browser_profile_dir(&self, session_id: &str) -> PathBuf {
        let safe_id = session_id.replace([':', '/', '\\'], "_");
        self.browser_dir().join("sessions").join(safe_id)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
