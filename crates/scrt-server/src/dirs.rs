use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Directory holding the database and key material (`scrt.db`, `scrt.key`,
/// `scrt.salt`), created if missing. `SCRT_DATA_DIR` wins over the platform
/// default.
pub fn data_dir() -> Result<PathBuf> {
    let path = match std::env::var_os("SCRT_DATA_DIR").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => ProjectDirs::from("link", "scrt", "scrt")
            .context("no home directory to place scrt data in; set SCRT_DATA_DIR")?
            .data_dir()
            .to_path_buf(),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("scrt");
        std::env::set_var("SCRT_DATA_DIR", &target);
        let resolved = data_dir();
        std::env::remove_var("SCRT_DATA_DIR");

        assert_eq!(resolved.unwrap(), target);
        assert!(target.is_dir());
    }
}
