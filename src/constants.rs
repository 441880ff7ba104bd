// src/constants.rs

/// Name of the axon configuration directory (inside the system config dir).
pub const CONFIG_DIR_NAME: &str = "axon";

/// Environment variable that overrides the configuration directory.
pub const CONFIG_DIR_ENV: &str = "AXON_CONFIG_DIR";

/// The persisted settings file (inside the configuration directory).
pub const SETTINGS_FILENAME: &str = "settings.toml";

/// Directory holding axon metadata inside a provisioned project.
pub const PROJECT_META_DIR: &str = ".axon";

/// Marker file that identifies a provisioned project (inside `.axon/`).
pub const PROJECT_MARKER_FILENAME: &str = "project.toml";

/// Prefix of task ids used for provisioning commands.
pub const CREATE_TASK_PREFIX: &str = "create:";

/// Task id of the MCU firmware build.
pub const MCU_BUILD_TASK_ID: &str = "mcu-build";

// --- MCU build layout ---

/// Root folder of an axon Yocto build tree.
pub const BUILD_AXON_FOLDER: &str = "build-axon";

/// Yocto project folder inside `build-axon`.
pub const LINUX_YP_PATH: &str = "linux_yp4.0_cgw_1.x.x_dev";

/// Destination folder for the MCU ROM, relative to the Yocto project folder.
pub const BOOT_FIRMWARE_FOLDER_DST: &str = "boot-firmware_tcn1000";

/// Candidate boot-firmware folder names inside the MCU build directory.
pub const BOOT_FIRMWARE_CANDIDATES: &[&str] = &["boot-firmware-tcn100x", "boot-firmware_tcn100x"];

/// Firmware image produced by the MCU build.
pub const ROM_NAME: &str = "tcn100x_snor.rom";

/// Default MCU core whose work directory is built.
pub const DEFAULT_BUILD_CORE: &str = "m7-1";

/// Default maximum age, in seconds, of a freshly built ROM.
pub const DEFAULT_ROM_TIMEOUT_SECS: u64 = 60;
