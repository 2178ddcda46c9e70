use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::consts::{APP_NAME, STORE_ENV};

#[derive(Debug, Error)]
pub enum PathsError {
  #[error("cannot determine the home directory: {0} is not set")]
  NoHome(&'static str),
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Result<PathBuf, PathsError> {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .map_err(|_| PathsError::NoHome("USERPROFILE"))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Result<PathBuf, PathsError> {
  std::env::var("HOME")
    .map(PathBuf::from)
    .map_err(|_| PathsError::NoHome("HOME"))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> Result<PathBuf, PathsError> {
  let appdata = std::env::var("APPDATA").map_err(|_| PathsError::NoHome("APPDATA"))?;
  Ok(PathBuf::from(appdata).join(APP_NAME))
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> Result<PathBuf, PathsError> {
  let data_home = match std::env::var("XDG_DATA_HOME") {
    Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => home_dir()?.join(".local").join("share"),
  };
  Ok(data_home.join(APP_NAME))
}

/// Default location of the local artifact store.
pub fn default_store_dir() -> Result<PathBuf, PathsError> {
  Ok(data_dir()?.join("artifacts"))
}

/// Pick the artifact store directory.
///
/// Precedence: explicit flag, then the workspace configuration, then the
/// `ZBUILD_STORE` environment variable, then [`default_store_dir`].
pub fn store_dir(flag: Option<&Path>, configured: Option<&Path>) -> Result<PathBuf, PathsError> {
  if let Some(dir) = flag.or(configured) {
    return Ok(dir.to_path_buf());
  }
  match std::env::var(STORE_ENV) {
    Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
    _ => default_store_dir(),
  }
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_data_home_takes_precedence() {
    temp_env::with_vars(
      [("XDG_DATA_HOME", Some("/custom/data")), ("HOME", Some("/home/user"))],
      || {
        assert_eq!(data_dir().unwrap(), PathBuf::from("/custom/data").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [("XDG_DATA_HOME", None::<&str>), ("HOME", Some("/home/user"))],
      || {
        assert_eq!(
          default_store_dir().unwrap(),
          PathBuf::from("/home/user/.local/share/zbuild/artifacts")
        );
      },
    );
  }

  #[test]
  #[serial]
  fn missing_home_is_an_error() {
    temp_env::with_vars([("XDG_DATA_HOME", None::<&str>), ("HOME", None::<&str>)], || {
      assert!(matches!(data_dir(), Err(PathsError::NoHome("HOME"))));
    });
  }

  #[test]
  #[serial]
  fn store_dir_precedence() {
    temp_env::with_vars(
      [
        (STORE_ENV, Some("/from/env")),
        ("XDG_DATA_HOME", Some("/data")),
        ("HOME", Some("/home/user")),
      ],
      || {
        let flag = Path::new("/from/flag");
        let configured = Path::new("/from/config");
        assert_eq!(store_dir(Some(flag), Some(configured)).unwrap(), flag);
        assert_eq!(store_dir(None, Some(configured)).unwrap(), configured);
        assert_eq!(store_dir(None, None).unwrap(), PathBuf::from("/from/env"));
      },
    );

    temp_env::with_vars(
      [(STORE_ENV, None::<&str>), ("XDG_DATA_HOME", Some("/data"))],
      || {
        assert_eq!(store_dir(None, None).unwrap(), PathBuf::from("/data/zbuild/artifacts"));
      },
    );
  }
}
