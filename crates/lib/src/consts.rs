/// Application name used for config, cache and data directories.
pub const APP_NAME: &str = "kopack";

/// Scheme prefix marking a string as a reference that must be buildable.
pub const STRICT_SCHEME: &str = "ko://";

/// Directory the executable is packaged into on Linux-style targets.
pub const APP_DIR: &str = "/ko-app";

/// Directory the executable is packaged into on Windows targets.
pub const WINDOWS_APP_DIR: &str = r"C:\ko-app";

/// Fallback executable name when none can be derived from the import path.
pub const DEFAULT_APP_FILENAME: &str = "ko-app";

/// Where the package's data tree lands inside the image.
pub const KODATA_ROOT: &str = "/var/run/ko";

/// Windows counterpart of [`KODATA_ROOT`].
pub const WINDOWS_KODATA_ROOT: &str = r"C:\var\run\ko";

/// Name of the data directory inside a main package.
pub const KODATA_DIR: &str = "kodata";

/// Environment variable pointing the running binary at its data tree.
pub const KO_DATA_PATH_ENV: &str = "KO_DATA_PATH";

/// Base image used when neither an override nor a project default applies.
pub const DEFAULT_BASE_IMAGE: &str = "cgr.dev/chainguard/static";

/// Base reference that denotes an empty image.
pub const SCRATCH: &str = "scratch";

/// Repository used by the local daemon publisher when none is configured.
pub const LOCAL_DOMAIN: &str = "ko.local";

/// Author and history attribution written into built images.
pub const IMAGE_AUTHOR: &str = "kopack";

/// Length of the hex suffix appended to image names by the default namer.
pub const NAME_HASH_LEN: usize = 32;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = ".kopack.yaml";
