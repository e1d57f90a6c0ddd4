//! On-disk conventions for bot bundles: naming rules, directory layout, and
//! archive extraction.
//!
//! A bundle is a zip archive whose root contains the entry file (by default
//! `index.js`). Bots live at `<root>/<account_id>/<name>`.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::error::BotError;

/// Entry file every bundle must contain at its root unless configured otherwise.
pub const DEFAULT_ENTRY_FILE: &str = "index.js";

/// Longest accepted bot name.
pub const MAX_NAME_LEN: usize = 64;

/// Top-level folder some archivers add alongside the real content.
const MACOS_METADATA_DIR: &str = "__MACOSX";

/// Check that `name` can serve as both a folder name and a runner process
/// name: ASCII alphanumerics, `-` and `_`, not starting with `-`.
pub fn validate_bot_name(name: &str) -> Result<(), BotError> {
    check_segment(name).map_err(|reason| BotError::InvalidName {
        name: name.to_owned(),
        reason,
    })
}

/// Same rules as [`validate_bot_name`], applied to the account segment of a
/// bot's path.
pub fn validate_account_id(account_id: &str) -> Result<(), BotError> {
    check_segment(account_id).map_err(|reason| BotError::InvalidName {
        name: account_id.to_owned(),
        reason: format!("account id {reason}"),
    })
}

fn check_segment(segment: &str) -> Result<(), String> {
    if segment.is_empty() {
        return Err("must not be empty".to_owned());
    }
    if segment.len() > MAX_NAME_LEN {
        return Err(format!("must be at most {MAX_NAME_LEN} characters"));
    }
    if segment.starts_with('-') {
        return Err("must not start with '-'".to_owned());
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(format!("contains invalid character {bad:?}"));
    }
    Ok(())
}

/// Deterministic install directory for a bot.
pub fn bot_dir(root: &Path, account_id: &str, name: &str) -> PathBuf {
    root.join(account_id).join(name)
}

/// Unique sibling directory used while a bundle is being extracted.
///
/// Starts with `.` so it can never collide with a valid bot name.
pub fn staging_dir(root: &Path, account_id: &str, name: &str) -> PathBuf {
    root.join(account_id)
        .join(format!(".staging-{name}-{}", uuid::Uuid::new_v4().simple()))
}

/// Extract a zip archive into `dest` and verify that `entry_file` ends up at
/// its root.
///
/// Blocking; run it on a blocking thread. `dest` must not exist yet. On error
/// `dest` may be left partially populated and the caller is expected to
/// remove it.
pub fn extract_bundle(
    archive: &[u8],
    dest: &Path,
    entry_file: &str,
    name: &str,
) -> Result<(), BotError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| BotError::install_failed(name, format!("corrupt archive: {e}")))?;

    fs::create_dir_all(dest).map_err(|e| {
        BotError::install_failed(name, format!("cannot create {}: {e}", dest.display()))
    })?;

    for index in 0..zip.len() {
        let mut file = zip
            .by_index(index)
            .map_err(|e| BotError::install_failed(name, format!("corrupt archive: {e}")))?;

        let relative = file
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| BotError::InvalidBotBundle {
                reason: format!("archive entry {:?} escapes the bundle root", file.name()),
            })?;
        let out_path = dest.join(&relative);

        if file.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| write_error(name, &out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(name, parent, e))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| write_error(name, &out_path, e))?;
        // Streamed: the declared entry size is not trusted.
        io::copy(&mut file, &mut out)
            .map_err(|e| BotError::install_failed(name, format!("cannot extract {}: {e}", relative.display())))?;
        drop(out);

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            // Keep the executable bits; never let an archive drop write access for us.
            let perms = fs::Permissions::from_mode((mode & 0o777) | 0o600);
            fs::set_permissions(&out_path, perms).map_err(|e| write_error(name, &out_path, e))?;
        }
    }

    hoist_single_root(dest, entry_file, name)?;

    if !dest.join(entry_file).is_file() {
        return Err(BotError::InvalidBotBundle {
            reason: format!("missing entry file {entry_file}"),
        });
    }
    Ok(())
}

fn write_error(name: &str, path: &Path, err: std::io::Error) -> BotError {
    BotError::install_failed(name, format!("cannot write {}: {err}", path.display()))
}

/// Flatten archives built by zipping a folder: when the entry file is not at
/// the root but the root holds a single directory that has it, move that
/// directory's children up one level.
fn hoist_single_root(dest: &Path, entry_file: &str, name: &str) -> Result<(), BotError> {
    if dest.join(entry_file).is_file() {
        return Ok(());
    }

    let io_err = |e: std::io::Error| BotError::install_failed(name, e);

    let mut dirs = Vec::new();
    let mut other_entries = 0usize;
    for entry in fs::read_dir(dest).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.file_name() == MACOS_METADATA_DIR {
            continue;
        }
        if entry.file_type().map_err(io_err)?.is_dir() {
            dirs.push(entry.path());
        } else {
            other_entries += 1;
        }
    }

    let [inner] = dirs.as_slice() else {
        return Ok(());
    };
    if other_entries > 0 || !inner.join(entry_file).is_file() {
        return Ok(());
    }

    debug!(bot = name, inner = %inner.display(), "hoisting single top-level folder");

    // Move aside first: a child may share the folder's own name.
    let holding = dest.join(format!(".hoist-{}", uuid::Uuid::new_v4().simple()));
    fs::rename(inner, &holding).map_err(io_err)?;
    for child in fs::read_dir(&holding).map_err(io_err)? {
        let child = child.map_err(io_err)?;
        fs::rename(child.path(), dest.join(child.file_name())).map_err(io_err)?;
    }
    fs::remove_dir(&holding).map_err(io_err)?;

    let metadata = dest.join(MACOS_METADATA_DIR);
    if metadata.is_dir() {
        fs::remove_dir_all(&metadata).map_err(io_err)?;
    }
    Ok(())
}
