//! Fake `csc` scripts for tests that spawn a compiler.
//!
//! Every script records its arguments to `args.txt` and its environment to `env.txt`
//! next to itself, sets `$out` from the `/out:` argument and `$src` from the `.cs`
//! argument, then runs the given body.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Body that writes a small non-empty "executable" to `$out`.
pub const WRITES_OUTPUT: &str = "printf 'MZ-fake-launcher' > \"$out\"";

/// Body that creates `$out` but leaves it empty.
pub const WRITES_EMPTY_OUTPUT: &str = ": > \"$out\"";

pub fn fake_compiler(dir: &Path, body: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join("csc");
    let script = format!(
        r#"#!/bin/sh
here=$(dirname "$0")
printf '%s\n' "$@" > "$here/args.txt"
env > "$here/env.txt"
out=""
src=""
for arg in "$@"; do
  case "$arg" in
    /out:*) out="${{arg#/out:}}" ;;
    *.cs) src="$arg" ;;
  esac
done
{}
"#,
        body
    );

    {
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        file.sync_all().unwrap();
    }
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Whether the fake compiler has been run since it was written.
pub fn was_invoked(dir: &Path) -> bool {
    dir.join("args.txt").exists()
}
