/// Application name, used for data directories.
pub const APP_NAME: &str = "zbuild";

/// The one and only accepted name for build files.
pub const BUILDFILE_NAME: &str = "build.yaml";

/// Directory, relative to a package's working directory, that build output is written to.
pub const BUILD_DIR: &str = "build";

/// Workspace configuration file name.
pub const CONFIG_FILENAME: &str = "zbuild.toml";

/// Scratch directory, relative to a package's working directory, for unpacked inputs.
pub const SCRATCH_DIR: &str = ".zbuild";

/// Environment variable overriding the artifact store location.
pub const STORE_ENV: &str = "ZBUILD_STORE";
