use std::path::PathBuf;

/// Runtime configuration shared between the CLI and the service plugins.
/// Assembled once at startup from flags and environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// ISO alpha-2 country code, upper-case. Used by catalog queries that
    /// filter geo-blocked titles.
    pub country_code: String,
    pub out_dir: PathBuf,
    pub no_indent: bool,
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            country_code: String::new(),
            out_dir: PathBuf::from("."),
            no_indent: false,
            verbose: false,
        }
    }
}
