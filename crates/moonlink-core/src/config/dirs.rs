use directories::ProjectDirs;
use std::path::PathBuf;

/// Application directories following XDG spec
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/moonlink)
    pub config: PathBuf,

    /// Data directory (~/.local/share/moonlink), holds log files
    pub data: PathBuf,

    /// Config file path
    pub config_file: PathBuf,
}

impl Directories {
    /// Standard XDG paths, or `None` when no home directory can be found.
    #[must_use]
    pub fn new() -> Option<Self> {
        let project = ProjectDirs::from("", "", "moonlink")?;
        let config = project.config_dir().to_path_buf();

        Some(Self {
            config_file: config.join("config.json"),
            data: project.data_dir().to_path_buf(),
            config,
        })
    }

    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.json"),
            data: base.clone(),
            config: base,
        }
    }

    /// XDG paths when available, otherwise the working directory.
    #[must_use]
    pub fn discover() -> Self {
        Self::new().unwrap_or_else(|| Self::with_base(PathBuf::from(".")))
    }

    /// Ensure all directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.data)?;
        Ok(())
    }
}
