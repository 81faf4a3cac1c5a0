//! Filesystem-safe artifact naming.
//!
//! A prompt becomes a file name by replacing characters that are illegal on
//! common filesystems and truncating it so the whole path stays within
//! [`MAX_PATH_LEN`] characters.

use std::path::{Path, PathBuf};

use crate::error::{DalleError, Result};

/// Upper bound on the full path length, in characters.
pub const MAX_PATH_LEN: usize = 200;

/// Characters held back from the file name budget.
pub const RESERVED_NAME_LEN: usize = 10;

const INVALID_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|'];

const ELLIPSIS: &str = "...";

/// Replace every character that cannot appear in a file name with `_`.
///
/// Control characters (newlines from multi-line prompts included) are
/// replaced as well.
pub fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Build `save_dir / (sanitized prompt + suffix)`, bounded in length.
///
/// The directory is resolved to an absolute path to measure it. If the
/// directory alone leaves no room for a name, fails with
/// [`DalleError::PathTooLong`] and touches nothing on disk. Otherwise the
/// directory is created when missing and the path is returned. Calling it
/// twice with the same inputs yields the same path.
pub fn build_image_path(save_dir: &Path, prompt: &str, suffix: &str) -> Result<PathBuf> {
    let sanitized = sanitize_prompt(prompt);
    let dir_len = resolve_dir(save_dir)?.to_string_lossy().chars().count();
    let suffix_len = suffix.chars().count();

    let allowed_name_len =
        MAX_PATH_LEN as i64 - dir_len as i64 - suffix_len as i64 - RESERVED_NAME_LEN as i64;
    if allowed_name_len <= 0 {
        tracing::error!(dir_len, "The file path is too long");
        return Err(DalleError::PathTooLong {
            dir_len,
            max: MAX_PATH_LEN,
        });
    }

    std::fs::create_dir_all(save_dir)?;

    let name = if (sanitized.chars().count() + suffix_len) as i64 > allowed_name_len {
        let keep = (allowed_name_len - suffix_len as i64 - ELLIPSIS.len() as i64).max(0) as usize;
        let mut truncated: String = sanitized.chars().take(keep).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    } else {
        sanitized
    };

    Ok(save_dir.join(format!("{}{}", name, suffix)))
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    if dir.exists() {
        return Ok(dunce::canonicalize(dir)?);
    }
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SUFFIX: &str = "-1718000000000000.png";

    fn path_len(path: &Path) -> usize {
        path.to_string_lossy().chars().count()
    }

    #[test]
    fn test_sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_prompt(r#"a/b\c*d?e"f<g>h|i"#), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_prompt("line one\nline two"), "line one_line two");
        assert_eq!(sanitize_prompt("a cat: on a mat"), "a cat: on a mat");
    }

    #[test]
    fn test_build_path_has_no_invalid_chars() {
        let temp = tempdir().unwrap();
        let path = build_image_path(temp.path(), r#"what / is \ this * ? " < > |"#, SUFFIX).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        for c in INVALID_CHARS {
            assert!(!name.contains(*c), "{:?} in {}", c, name);
        }
        assert!(name.ends_with(SUFFIX));
        assert_eq!(path.parent().unwrap(), temp.path());
    }

    #[test]
    fn test_long_prompt_is_truncated() {
        let temp = tempdir().unwrap();
        let prompt = "a very detailed painting of a lighthouse ".repeat(20);
        let path = build_image_path(temp.path(), &prompt, SUFFIX).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let stem = name.strip_suffix(SUFFIX).unwrap();
        assert!(stem.ends_with("..."));
        assert!(path_len(&dunce::canonicalize(temp.path()).unwrap().join(&name)) <= MAX_PATH_LEN);
    }

    #[test]
    fn test_short_prompt_is_kept() {
        let temp = tempdir().unwrap();
        let path = build_image_path(temp.path(), "a red fox", SUFFIX).unwrap();
        assert_eq!(path.file_name().unwrap().to_string_lossy(), format!("a red fox{}", SUFFIX));
    }

    #[test]
    fn test_too_long_directory_fails_without_creating_it() {
        let temp = tempdir().unwrap();
        let deep = temp.path().join("d".repeat(MAX_PATH_LEN));
        let result = build_image_path(&deep, "a red fox", SUFFIX);
        assert!(matches!(result, Err(DalleError::PathTooLong { .. })));
        assert!(!deep.exists());
    }

    #[test]
    fn test_creates_missing_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("saved_images");
        assert!(!dir.exists());
        build_image_path(&dir, "a red fox", SUFFIX).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_build_path_is_idempotent() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("out");
        let prompt = "sunset over the sea, ".repeat(15);
        let first = build_image_path(&dir, &prompt, SUFFIX).unwrap();
        let second = build_image_path(&dir, &prompt, SUFFIX).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_multibyte_prompt_truncates_on_char_boundary() {
        let temp = tempdir().unwrap();
        let prompt = "夕焼けの海".repeat(60);
        let path = build_image_path(temp.path(), &prompt, SUFFIX).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(&format!("...{}", SUFFIX)));
    }
}
