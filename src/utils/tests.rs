use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_warn_once_only_emits_first_time() {
    let message = format!("warn-once-test-{}", std::process::id());
    assert!(warn_once(message.clone()));
    assert!(!warn_once(message.clone()));
    assert!(!warn_once(message));
}

#[test]
fn test_expand_tilde() {
    assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    assert_eq!(expand_tilde("relative"), PathBuf::from("relative"));

    if let Some(home) = dirs::home_dir() {
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/data/zsh"), home.join("data/zsh"));
    }

    // Only a leading "~/" is special.
    assert_eq!(expand_tilde("a/~/b"), PathBuf::from("a/~/b"));
}

#[test]
fn test_safe_file_name() {
    assert_eq!(safe_file_name("zsh history"), "zsh_history");
    assert_eq!(safe_file_name("commits:/home/me/repo"), "commits__home_me_repo");
}

#[test]
fn test_format_bytes() {
    assert_eq!(format_bytes(512), "512 bytes");
    assert_eq!(format_bytes(2048), "2.00 KB");
    assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
}

#[test]
fn test_dir_size() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested/b"), [0u8; 5]).unwrap();

    assert_eq!(dir_size(dir.path()), 15);
    assert_eq!(dir_size(&dir.path().join("missing")), 0);
}
