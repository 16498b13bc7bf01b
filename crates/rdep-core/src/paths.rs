use dirs::home_dir;
use std::path::PathBuf;

/// Resolve the rdep home from an explicit `RDEP_HOME` value, falling back to
/// `~/.rdep`. None if neither is available.
pub fn resolve_home(explicit: Option<String>) -> Option<PathBuf> {
    explicit
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|h| h.join(".rdep")))
}

/// Returns the rdep home directory, or None if the user's home cannot be resolved.
pub fn try_rdep_home() -> Option<PathBuf> {
    resolve_home(std::env::var("RDEP_HOME").ok())
}

/// Returns the rdep home directory (`~/.rdep`), falling back to `./.rdep`
/// when no home directory can be determined.
pub fn rdep_home() -> PathBuf {
    try_rdep_home().unwrap_or_else(|| PathBuf::from(".rdep"))
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://repo.example.org/g/a/1.0/a-1.0.jar"),
            "a-1.0.jar"
        );
        assert_eq!(filename_from_url(""), "");
    }

    #[test]
    fn test_explicit_home_wins() {
        assert_eq!(
            resolve_home(Some("/opt/rdep".into())),
            Some(PathBuf::from("/opt/rdep"))
        );
        assert_ne!(resolve_home(Some("  ".into())), Some(PathBuf::from("  ")));
    }
}
